//! Node path helpers and the parent-node initializer.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ZkError, ZkResult};
use crate::session::{Acl, CreateMode, Session};

/// Path separator.
pub const SEPARATOR: char = '/';

/// Check that `path` is a well-formed absolute node path.
///
/// The root `/` is valid. Every other path starts with `/`, has no trailing
/// `/`, no empty, `.` or `..` segments and no NUL characters.
pub fn validate_path(path: &str) -> ZkResult<()> {
    if path == "/" {
        return Ok(());
    }
    let Some(rest) = path.strip_prefix(SEPARATOR) else {
        return Err(ZkError::InvalidPath);
    };
    let valid = rest.split(SEPARATOR).all(|segment| {
        !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\0')
    });
    if valid {
        Ok(())
    } else {
        Err(ZkError::InvalidPath)
    }
}

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with(SEPARATOR) {
        format!("{parent}{child}")
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

/// Split a valid, non-root path into its parent path and last segment.
pub(crate) fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

/// Rewrite the last segment of `path` into a protected name owned by `id`:
/// `/svc/instance-` becomes `/svc/_c_<id>-instance-`.
pub(crate) fn protected_path(path: &str, id: &Uuid) -> String {
    let (parent, name) = split_parent(path);
    join(parent, &format!("_c_{}-{name}", id.simple()))
}

/// Returns true if the node name was created through [`protected_path`]
/// with `id`.
pub(crate) fn is_protected_by(name: &str, id: &Uuid) -> bool {
    name.strip_prefix("_c_")
        .and_then(|rest| rest.strip_prefix(id.simple().to_string().as_str()))
        .is_some_and(|rest| rest.starts_with('-'))
}

/// Every node from the first segment down to `path` itself, in creation
/// order: `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
pub(crate) fn lineage(path: &str) -> Vec<&str> {
    path.match_indices(SEPARATOR)
        .skip(1)
        .map(|(idx, _)| &path[..idx])
        .chain((path != "/").then_some(path))
        .collect()
}

/// Make sure every node of `path` exists, creating missing ones from the
/// root down.
///
/// Intermediate nodes get `payload[0]`, the node named by `path` gets
/// `payload[1]`. A node that already exists counts as created, which makes
/// concurrent initializers of the same path safe. A node that vanishes
/// under us (`NoNode` while creating a child) restarts the walk once.
pub(crate) async fn create_parent_nodes(
    session: &dyn Session,
    path: &str,
    acl: &[Acl],
    payload: &[Vec<u8>; 2],
) -> ZkResult<()> {
    validate_path(path)?;
    let nodes = lineage(path);
    let mut restarted = false;

    'walk: loop {
        for (idx, node) in nodes.iter().enumerate() {
            let data = if idx + 1 == nodes.len() {
                &payload[1]
            } else {
                &payload[0]
            };
            match session.create(node, data, CreateMode::Persistent, acl).await {
                Ok(_) => debug!(node, "created node"),
                Err(ZkError::NodeExists) => {}
                // read-only ancestors are fine as long as they exist
                Err(ZkError::NoAuth) => {
                    if session.exists(node).await?.is_none() {
                        return Err(ZkError::NoAuth);
                    }
                }
                Err(ZkError::NoNode) if !restarted => {
                    warn!(node, path, "ancestor removed while creating path, retrying once");
                    restarted = true;
                    continue 'walk;
                }
                Err(err) => return Err(err),
            }
        }
        return Ok(());
    }
}
