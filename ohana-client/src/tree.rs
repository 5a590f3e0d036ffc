use std::collections::HashMap;

use crate::{Comment, CommentKey};

/// A comment with its replies resolved. Purely derived: rebuilt from the
/// flat list whenever it changes, never mutated in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

/// Builds the reply forest for one post's flat comment list.
///
/// Comments whose parent is absent from the list are shown as roots rather
/// than dropped, so inconsistent pagination never makes a comment disappear.
/// Sibling order follows input order. Runs in O(n): one pass to index ids,
/// one to attach children, one to assemble.
pub fn build_tree(comments: &[Comment]) -> Vec<CommentNode> {
    let mut position = HashMap::with_capacity(comments.len());
    for (i, c) in comments.iter().enumerate() {
        if let CommentKey::Committed(id) = c.key {
            position.insert(id, i);
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    let mut roots = Vec::new();
    for (i, c) in comments.iter().enumerate() {
        match c.parent_id.and_then(|p| position.get(&p).copied()) {
            // Guard against a comment claiming to be its own parent
            Some(parent) if parent != i => children[parent].push(i),
            _ => roots.push(i),
        }
    }

    let mut visited = vec![false; comments.len()];
    let mut forest = Vec::with_capacity(roots.len());
    for i in roots {
        forest.push(assemble(i, comments, &children, &mut visited));
    }
    // A parent loop in inconsistent data is reachable from no root; surface
    // its comments as extra roots instead of losing them.
    for i in 0..comments.len() {
        if !visited[i] {
            tracing::warn!(comment = ?comments[i].key, "comment in a parent loop, treating as root");
            forest.push(assemble(i, comments, &children, &mut visited));
        }
    }
    forest
}

fn assemble(
    i: usize,
    comments: &[Comment],
    children: &[Vec<usize>],
    visited: &mut Vec<bool>,
) -> CommentNode {
    visited[i] = true;
    let mut replies = Vec::with_capacity(children[i].len());
    for &c in &children[i] {
        if !visited[c] {
            replies.push(assemble(c, comments, children, visited));
        }
    }
    CommentNode {
        comment: comments[i].clone(),
        replies,
    }
}

/// Total number of comments in the forest, nested replies included. Distinct
/// from `forest.len()`, which only counts roots.
pub fn count_all(nodes: &[CommentNode]) -> usize {
    nodes.iter().map(|n| 1 + count_all(&n.replies)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CommentId, PostId, UserId, Uuid};
    use crate::TempId;

    fn cid(n: u128) -> CommentId {
        CommentId(Uuid::from_u128(n))
    }

    fn comment(id: u128, parent: Option<u128>) -> Comment {
        Comment {
            key: CommentKey::Committed(cid(id)),
            post_id: PostId::stub(),
            author_id: UserId::stub(),
            date: chrono::Utc::now(),
            text: format!("comment {id}"),
            parent_id: parent.map(cid),
        }
    }

    fn keys(nodes: &[CommentNode]) -> Vec<CommentKey> {
        nodes.iter().map(|n| n.comment.key).collect()
    }

    #[test]
    fn two_levels_of_replies() {
        let flat = vec![
            comment(1, None),
            comment(2, Some(1)),
            comment(3, Some(1)),
            comment(4, Some(2)),
        ];
        let tree = build_tree(&flat);
        assert_eq!(keys(&tree), vec![CommentKey::Committed(cid(1))]);
        assert_eq!(
            keys(&tree[0].replies),
            vec![CommentKey::Committed(cid(2)), CommentKey::Committed(cid(3))]
        );
        assert_eq!(
            keys(&tree[0].replies[0].replies),
            vec![CommentKey::Committed(cid(4))]
        );
        assert!(tree[0].replies[1].replies.is_empty());
        assert_eq!(count_all(&tree), 4);
    }

    #[test]
    fn orphans_become_roots() {
        // Parent 42 was never fetched; its replies must still show up
        let flat = vec![comment(1, None), comment(2, Some(42)), comment(3, Some(2))];
        let tree = build_tree(&flat);
        assert_eq!(
            keys(&tree),
            vec![CommentKey::Committed(cid(1)), CommentKey::Committed(cid(2))]
        );
        assert_eq!(keys(&tree[1].replies), vec![CommentKey::Committed(cid(3))]);
        assert_eq!(count_all(&tree), flat.len());
    }

    #[test]
    fn sibling_order_is_input_order() {
        let flat = vec![
            comment(10, None),
            comment(5, Some(10)),
            comment(9, Some(10)),
            comment(2, Some(10)),
            comment(7, None),
        ];
        let tree = build_tree(&flat);
        assert_eq!(
            keys(&tree),
            vec![CommentKey::Committed(cid(10)), CommentKey::Committed(cid(7))]
        );
        assert_eq!(
            keys(&tree[0].replies),
            vec![
                CommentKey::Committed(cid(5)),
                CommentKey::Committed(cid(9)),
                CommentKey::Committed(cid(2)),
            ]
        );
    }

    #[test]
    fn pending_comments_are_part_of_the_tree() {
        let mut pending = comment(0, Some(1));
        pending.key = CommentKey::Pending(TempId(17));
        let flat = vec![comment(1, None), pending];
        let tree = build_tree(&flat);
        assert_eq!(count_all(&tree), 2);
        assert_eq!(
            keys(&tree[0].replies),
            vec![CommentKey::Pending(TempId(17))]
        );
    }

    #[test]
    fn self_parent_and_loops_terminate() {
        let flat = vec![
            comment(1, Some(1)),
            comment(2, Some(3)),
            comment(3, Some(2)),
        ];
        let tree = build_tree(&flat);
        // Nothing is dropped even though the data is nonsense
        assert_eq!(count_all(&tree), flat.len());
    }

    #[test]
    fn every_comment_appears_exactly_once() {
        let shapes: Vec<Vec<(u128, Option<u128>)>> = vec![
            vec![],
            vec![(1, None)],
            vec![(1, None), (2, None), (3, None)],
            vec![(1, None), (2, Some(1)), (3, Some(2)), (4, Some(3))],
            vec![(1, Some(99)), (2, Some(1)), (3, None), (4, Some(3)), (5, Some(3))],
        ];
        for shape in shapes {
            let flat: Vec<_> = shape.iter().map(|&(id, p)| comment(id, p)).collect();
            assert_eq!(count_all(&build_tree(&flat)), flat.len());
        }
    }
}
