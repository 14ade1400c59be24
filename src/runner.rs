use std::future::Future;

use tokio::sync::Mutex;

use crate::control::Controller;
use crate::error::Result;

/// Boilerplate reducer for simple pipelines: owns the controller for one
/// run at a time and exposes an abort handle.
pub struct Runner<F> {
    run_fn: F,
    ctrl: Mutex<Option<Controller>>,
}

impl<F, Fut> Runner<F>
where
    F: Fn(Controller) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    pub fn new(run_fn: F) -> Self {
        Self {
            run_fn,
            ctrl: Mutex::new(None),
        }
    }

    /// Execute the run function under a fresh controller.
    pub async fn run(&self) -> Result<()> {
        let ctrl = Controller::new();
        *self.ctrl.lock().await = Some(ctrl.clone());
        let result = (self.run_fn)(ctrl).await;
        *self.ctrl.lock().await = None;
        result
    }

    /// Abort the in-flight run, if any, and wait for it to unwind.
    pub async fn abort(&self) {
        let ctrl = self.ctrl.lock().await.take();
        if let Some(ctrl) = ctrl {
            ctrl.abort().await;
        }
    }
}
