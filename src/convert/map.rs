use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Dotted-path moves applied to a map: source path to destination path.
/// A destination of `"-"` deletes the value.
pub type MapTransform = HashMap<String, String>;

/// Copy a map, optionally applying a transform to the copy.
pub fn copy_map(
    src: &Map<String, Value>,
    transform: Option<&MapTransform>,
) -> Result<Map<String, Value>> {
    let mut result = src.clone();
    if let Some(transform) = transform {
        transform_map(&mut result, transform)?;
    }
    Ok(result)
}

/// Move values along dotted paths inside a map.
///
/// Missing sources are skipped; destination paths are created as needed;
/// a destination leaf of `"-"` drops the value. Traversing through a
/// non-object value is an error.
pub fn transform_map(target: &mut Map<String, Value>, transforms: &MapTransform) -> Result<()> {
    for (src_path, dest_path) in transforms {
        let present = match navigate_to_parent(target, src_path, false)? {
            Some(parent) => parent.contains_key(last_step(src_path)),
            None => false,
        };
        if !present {
            continue;
        }

        if last_step(dest_path) != "-" {
            navigate_to_parent(target, dest_path, true)?;
        }

        let value = navigate_to_parent(target, src_path, false)?
            .and_then(|parent| parent.remove(last_step(src_path)));
        let Some(value) = value else { continue };

        let dest_leaf = last_step(dest_path);
        if dest_leaf == "-" {
            continue;
        }
        if let Some(parent) = navigate_to_parent(target, dest_path, true)? {
            parent.insert(dest_leaf.to_string(), value);
        }
    }
    Ok(())
}

/// Walk to the map holding a path's final step, optionally creating
/// intermediate objects.
fn navigate_to_parent<'a>(
    target: &'a mut Map<String, Value>,
    path: &str,
    create_as_needed: bool,
) -> Result<Option<&'a mut Map<String, Value>>> {
    let steps: Vec<&str> = path.split('.').collect();
    let mut current = target;
    for step in &steps[..steps.len().saturating_sub(1)] {
        if !current.contains_key(*step) {
            if !create_as_needed {
                return Ok(None);
            }
            current.insert(step.to_string(), Value::Object(Map::new()));
        }
        match current.get_mut(*step) {
            Some(Value::Object(inner)) => current = inner,
            _ => {
                return Err(Error::schema(format!(
                    "cannot traverse {path:?}: {step:?} is not an object"
                )))
            }
        }
    }
    Ok(Some(current))
}

fn last_step(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}
