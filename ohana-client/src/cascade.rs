use std::collections::HashSet;

use crate::api::CommentId;
use crate::{Comment, CommentKey};

/// Every comment transitively replying to `parent`, excluding `parent`
/// itself. Pending replies caught under the deleted subtree are included,
/// since the server will never confirm them against a deleted parent.
///
/// Tracks visited ids so inconsistent data (self-parents, loops) cannot make
/// it run forever or report duplicates.
pub fn collect_descendants(parent: CommentId, comments: &[Comment]) -> HashSet<CommentKey> {
    let mut result = HashSet::new();
    let mut visited: HashSet<CommentId> = HashSet::new();
    visited.insert(parent);
    let mut frontier = vec![parent];
    while let Some(p) = frontier.pop() {
        for c in comments {
            if c.parent_id != Some(p) {
                continue;
            }
            match c.key {
                CommentKey::Committed(id) => {
                    if visited.insert(id) {
                        result.insert(c.key);
                        frontier.push(id);
                    }
                }
                CommentKey::Pending(_) => {
                    result.insert(c.key);
                }
            }
        }
    }
    result
}

/// The full set a delete removes from local state: the comment plus its
/// entire reply subtree, pruned in one atomic cache update.
pub fn removal_set(target: CommentId, comments: &[Comment]) -> HashSet<CommentKey> {
    let mut set = collect_descendants(target, comments);
    set.insert(CommentKey::Committed(target));
    set
}
