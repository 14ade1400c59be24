use crate::control::Controller;

/// A startup barrier over other controllers.
///
/// A stage that must not begin until earlier stages have finished waits on a
/// `DependencyGroup` holding their controllers. Waiting marks each referenced
/// child controller as fully constructed first, so a dependency that was
/// never released cannot deadlock the waiter.
#[derive(Default)]
pub struct DependencyGroup {
    ctrls: Vec<Controller>,
}

impl DependencyGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of controllers this group waits on.
    pub fn set(&mut self, ctrls: impl IntoIterator<Item = Controller>) {
        self.ctrls = ctrls.into_iter().collect();
    }

    pub fn is_empty(&self) -> bool {
        self.ctrls.is_empty()
    }

    /// Block until every referenced controller is done.
    pub async fn wait(&self) {
        for ctrl in &self.ctrls {
            ctrl.ensure_built();
            ctrl.wait().await;
        }
    }
}
