//! Operational transformation over single-span text edits.
//!
//! An [`Op`] is one edit intent: insert text at a position, delete a span,
//! or replace a span. Concurrent ops are rebased past each other with
//! [`transform`], so both orders of application converge. Positions and
//! lengths are measured in Unicode code points of the document content.

use serde::{Deserialize, Serialize};

/// The edit payload of an operation. Only the fields a kind needs exist on
/// that variant; `retain` carries no state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OpKind {
    Insert { content: String },
    Delete { length: usize },
    Replace { content: String, length: usize },
    Retain,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Insert { .. } => "insert",
            OpKind::Delete { .. } => "delete",
            OpKind::Replace { .. } => "replace",
            OpKind::Retain => "retain",
        }
    }

    /// Code points this op adds to the document.
    pub fn inserted_len(&self) -> usize {
        match self {
            OpKind::Insert { content } | OpKind::Replace { content, .. } => {
                content.chars().count()
            }
            _ => 0,
        }
    }

    /// Code points this op removes from the document.
    pub fn removed_len(&self) -> usize {
        match self {
            OpKind::Delete { length } | OpKind::Replace { length, .. } => *length,
            _ => 0,
        }
    }
}

/// A single edit intent, attributed to a user and session.
///
/// The wire form is flat: `{"type": "insert", "position": 3, "content": "x",
/// ...}`. Server-assigned fields (`id`, `version`, `applied`) default when a
/// client omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Op {
    #[serde(flatten)]
    pub kind: OpKind,
    pub position: usize,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub client_id: String,
    pub timestamp: u64,
    #[serde(default = "new_op_id")]
    pub id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub applied: bool,
}

fn new_op_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Why an inbound operation was rejected at admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpValidationError {
    #[error("operation kind '{0}' cannot be applied")]
    UnsupportedKind(&'static str),
    #[error("insert content must not be empty")]
    EmptyInsert,
    #[error("delete/replace length must be greater than zero")]
    ZeroLength,
    #[error("span {position}..{end} exceeds document length {doc_len}")]
    OutOfBounds {
        position: usize,
        end: usize,
        doc_len: usize,
    },
}

impl Op {
    pub fn new(kind: OpKind, position: usize, user_id: &str, timestamp: u64) -> Self {
        Self {
            kind,
            position,
            user_id: user_id.to_string(),
            client_id: String::new(),
            timestamp,
            id: new_op_id(),
            version: 0,
            applied: false,
        }
    }

    pub fn insert(position: usize, content: &str, user_id: &str, timestamp: u64) -> Self {
        Self::new(
            OpKind::Insert {
                content: content.to_string(),
            },
            position,
            user_id,
            timestamp,
        )
    }

    pub fn delete(position: usize, length: usize, user_id: &str, timestamp: u64) -> Self {
        Self::new(OpKind::Delete { length }, position, user_id, timestamp)
    }

    pub fn replace(
        position: usize,
        length: usize,
        content: &str,
        user_id: &str,
        timestamp: u64,
    ) -> Self {
        Self::new(
            OpKind::Replace {
                content: content.to_string(),
                length,
            },
            position,
            user_id,
            timestamp,
        )
    }

    pub fn retain(user_id: &str, timestamp: u64) -> Self {
        Self::new(OpKind::Retain, 0, user_id, timestamp)
    }

    /// One past the last code point this op removes.
    pub fn end(&self) -> usize {
        self.position + self.kind.removed_len()
    }

    /// Net change in document length, in code points.
    pub fn net_delta(&self) -> isize {
        self.kind.inserted_len() as isize - self.kind.removed_len() as isize
    }

    /// Admission check against the current document length.
    pub fn validate(&self, doc_len: usize) -> Result<(), OpValidationError> {
        match &self.kind {
            OpKind::Retain => return Err(OpValidationError::UnsupportedKind("retain")),
            OpKind::Insert { content } => {
                if content.is_empty() {
                    return Err(OpValidationError::EmptyInsert);
                }
                if self.position > doc_len {
                    return Err(OpValidationError::OutOfBounds {
                        position: self.position,
                        end: self.position,
                        doc_len,
                    });
                }
            }
            OpKind::Delete { length } | OpKind::Replace { length, .. } => {
                if *length == 0 {
                    return Err(OpValidationError::ZeroLength);
                }
                if self.position + length > doc_len {
                    return Err(OpValidationError::OutOfBounds {
                        position: self.position,
                        end: self.position + length,
                        doc_len,
                    });
                }
            }
        }
        Ok(())
    }

    fn with_position(&self, position: usize) -> Op {
        let mut op = self.clone();
        op.position = position;
        op
    }

    fn with_removed_len(&self, length: usize) -> Op {
        let mut op = self.clone();
        match &mut op.kind {
            OpKind::Delete { length: l } | OpKind::Replace { length: l, .. } => *l = length,
            _ => {}
        }
        op
    }
}

/// Apply an op to `text`, returning the new text. Out-of-range spans are
/// clamped to the document; `retain` is the identity.
pub fn apply(text: &str, op: &Op) -> String {
    let chars: Vec<char> = text.chars().collect();
    let pos = op.position.min(chars.len());

    match &op.kind {
        OpKind::Retain => text.to_string(),
        OpKind::Insert { content } => {
            let mut out = String::with_capacity(text.len() + content.len());
            out.extend(chars[..pos].iter());
            out.push_str(content);
            out.extend(chars[pos..].iter());
            out
        }
        OpKind::Delete { length } => {
            let end = (pos + length).min(chars.len());
            let mut out = String::with_capacity(text.len());
            out.extend(chars[..pos].iter());
            out.extend(chars[end..].iter());
            out
        }
        OpKind::Replace { content, length } => {
            let end = (pos + length).min(chars.len());
            let mut out = String::with_capacity(text.len() + content.len());
            out.extend(chars[..pos].iter());
            out.push_str(content);
            out.extend(chars[end..].iter());
            out
        }
    }
}

/// Apply a sequence of ops in order.
pub fn apply_all(text: &str, ops: &[Op]) -> String {
    ops.iter().fold(text.to_string(), |t, op| apply(&t, op))
}

/// Rebase `a` past `b` and `b` past `a` so the pair can be applied in either
/// order. `a_priority` breaks position ties in `a`'s favor. A `None` output
/// means that side was absorbed by the other op and must be dropped.
pub fn transform(a: &Op, b: &Op, a_priority: bool) -> (Option<Op>, Option<Op>) {
    // Identical ids: the second sighting is redundant.
    if a.id == b.id {
        return (Some(a.clone()), None);
    }
    // Retain transforms to itself and moves nothing.
    if a.kind == OpKind::Retain || b.kind == OpKind::Retain {
        return (Some(a.clone()), Some(b.clone()));
    }

    match (&a.kind, &b.kind) {
        (OpKind::Insert { .. }, OpKind::Insert { .. }) => {
            transform_insert_insert(a, b, a_priority)
        }
        (OpKind::Insert { .. }, OpKind::Delete { .. }) => transform_insert_delete(a, b),
        (OpKind::Delete { .. }, OpKind::Insert { .. }) => {
            let (ins, del) = transform_insert_delete(b, a);
            (del, ins)
        }
        (OpKind::Insert { .. }, OpKind::Replace { .. }) => transform_insert_replace(a, b),
        (OpKind::Replace { .. }, OpKind::Insert { .. }) => {
            let (ins, rep) = transform_insert_replace(b, a);
            (rep, ins)
        }
        (OpKind::Delete { .. }, OpKind::Delete { .. }) => transform_delete_delete(a, b),
        (OpKind::Delete { .. }, OpKind::Replace { .. }) => transform_delete_replace(a, b),
        (OpKind::Replace { .. }, OpKind::Delete { .. }) => {
            let (del, rep) = transform_delete_replace(b, a);
            (rep, del)
        }
        (OpKind::Replace { .. }, OpKind::Replace { .. }) => {
            transform_replace_replace(a, b, a_priority)
        }
        (OpKind::Retain, _) | (_, OpKind::Retain) => unreachable!("handled above"),
    }
}

fn transform_insert_insert(a: &Op, b: &Op, a_priority: bool) -> (Option<Op>, Option<Op>) {
    if a.position < b.position || (a.position == b.position && a_priority) {
        let b2 = b.with_position(b.position + a.kind.inserted_len());
        (Some(a.clone()), Some(b2))
    } else {
        let a2 = a.with_position(a.position + b.kind.inserted_len());
        (Some(a2), Some(b.clone()))
    }
}

/// `ins` against `del`, returned as `(ins', del')`.
fn transform_insert_delete(ins: &Op, del: &Op) -> (Option<Op>, Option<Op>) {
    let ins_len = ins.kind.inserted_len();
    let del_len = del.kind.removed_len();

    if ins.position <= del.position {
        let del2 = del.with_position(del.position + ins_len);
        (Some(ins.clone()), Some(del2))
    } else if ins.position >= del.end() {
        let ins2 = ins.with_position(ins.position - del_len);
        (Some(ins2), Some(del.clone()))
    } else {
        // Insert falls inside the deleted range: clamp to its start.
        let ins2 = ins.with_position(del.position);
        (Some(ins2), Some(del.clone()))
    }
}

/// `ins` against `rep`, returned as `(ins', rep')`.
fn transform_insert_replace(ins: &Op, rep: &Op) -> (Option<Op>, Option<Op>) {
    let ins_len = ins.kind.inserted_len();

    if ins.position <= rep.position {
        let rep2 = rep.with_position(rep.position + ins_len);
        (Some(ins.clone()), Some(rep2))
    } else if ins.position >= rep.end() {
        let shifted = (ins.position as isize + rep.net_delta()) as usize;
        (Some(ins.with_position(shifted)), Some(rep.clone()))
    } else {
        // Inside the replaced range: land just after the replacement text.
        let ins2 = ins.with_position(rep.position + rep.kind.inserted_len());
        (Some(ins2), Some(rep.clone()))
    }
}

fn transform_delete_delete(a: &Op, b: &Op) -> (Option<Op>, Option<Op>) {
    if a.end() <= b.position {
        let b2 = b.with_position(b.position - a.kind.removed_len());
        return (Some(a.clone()), Some(b2));
    }
    if b.end() <= a.position {
        let a2 = a.with_position(a.position - b.kind.removed_len());
        return (Some(a2), Some(b.clone()));
    }

    // Overlapping spans: each side keeps what the other did not remove.
    let overlap = a.end().min(b.end()) - a.position.max(b.position);
    let a_rem = a.kind.removed_len() - overlap;
    let b_rem = b.kind.removed_len() - overlap;
    let start = a.position.min(b.position);

    let a2 = (a_rem > 0).then(|| a.with_position(start).with_removed_len(a_rem));
    let b2 = (b_rem > 0).then(|| b.with_position(start).with_removed_len(b_rem));
    (a2, b2)
}

/// `del` against `rep`, returned as `(del', rep')`. Overlap follows the
/// delete-delete span arithmetic; a replace whose whole span is deleted is
/// absorbed, and the delete then swallows the replacement text so both
/// application orders converge.
fn transform_delete_replace(del: &Op, rep: &Op) -> (Option<Op>, Option<Op>) {
    if del.end() <= rep.position {
        let rep2 = rep.with_position(rep.position - del.kind.removed_len());
        return (Some(del.clone()), Some(rep2));
    }
    if rep.end() <= del.position {
        let shifted = (del.position as isize + rep.net_delta()) as usize;
        return (Some(del.with_position(shifted)), Some(rep.clone()));
    }

    let overlap = del.end().min(rep.end()) - del.position.max(rep.position);
    let del_rem = del.kind.removed_len() - overlap;
    let rep_rem = rep.kind.removed_len() - overlap;

    let rep2 = (rep_rem > 0).then(|| {
        let pos = rep.position.min(del.position);
        rep.with_position(pos).with_removed_len(rep_rem)
    });

    let del_len = if rep_rem == 0 {
        del_rem + rep.kind.inserted_len()
    } else {
        del_rem
    };
    let del2 = (del_len > 0).then(|| {
        let pos = if del.position <= rep.position {
            del.position
        } else {
            rep.position + rep.kind.inserted_len()
        };
        del.with_position(pos).with_removed_len(del_len)
    });

    (del2, rep2)
}

fn transform_replace_replace(a: &Op, b: &Op, a_priority: bool) -> (Option<Op>, Option<Op>) {
    if a.end() <= b.position {
        let shifted = (b.position as isize + a.net_delta()) as usize;
        return (Some(a.clone()), Some(b.with_position(shifted)));
    }
    if b.end() <= a.position {
        let shifted = (a.position as isize + b.net_delta()) as usize;
        return (Some(a.with_position(shifted)), Some(b.clone()));
    }

    // Overlapping replaces: the priority side wins whole.
    if a_priority {
        (Some(a.clone()), None)
    } else {
        (None, Some(b.clone()))
    }
}

/// Rebase `op` past every op in `earlier` that is strictly earlier by
/// `(timestamp, user_id)` order. Returns `None` if `op` is absorbed along
/// the way. Later ops are skipped; they are transformed against this one
/// when they pass through themselves.
pub fn transform_against(op: &Op, earlier: &[Op]) -> Option<Op> {
    let mut ordered: Vec<&Op> = earlier.iter().collect();
    ordered.sort_by(|x, y| (x.timestamp, x.user_id.as_str()).cmp(&(y.timestamp, y.user_id.as_str())));

    let mut current = op.clone();
    for other in ordered {
        if (other.timestamp, other.user_id.as_str()) >= (current.timestamp, current.user_id.as_str())
        {
            continue;
        }
        match transform(&current, other, false) {
            (Some(t), _) => current = t,
            (None, _) => return None,
        }
    }
    Some(current)
}

/// Fold a single user's batch into fewer ops. Inserts merge when the second
/// continues exactly where the first left off; deletes merge when they share
/// a position (a delete-key run). Replace is never merged.
pub fn merge_batch(mut ops: Vec<Op>) -> Vec<Op> {
    ops.sort_by(|a, b| (a.position, a.timestamp).cmp(&(b.position, b.timestamp)));

    let mut merged: Vec<Op> = Vec::with_capacity(ops.len());
    for op in ops {
        let absorbed = match merged.last_mut() {
            Some(last) if last.user_id == op.user_id => match (&mut last.kind, &op.kind) {
                (OpKind::Insert { content: c1 }, OpKind::Insert { content: c2 })
                    if last.position + c1.chars().count() == op.position =>
                {
                    c1.push_str(c2);
                    true
                }
                (OpKind::Delete { length: l1 }, OpKind::Delete { length: l2 })
                    if last.position == op.position =>
                {
                    *l1 += l2;
                    true
                }
                _ => false,
            },
            _ => false,
        };
        if !absorbed {
            merged.push(op);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(pos: usize, content: &str, user: &str, ts: u64) -> Op {
        Op::insert(pos, content, user, ts)
    }

    fn del(pos: usize, len: usize, user: &str, ts: u64) -> Op {
        Op::delete(pos, len, user, ts)
    }

    fn rep(pos: usize, len: usize, content: &str, user: &str, ts: u64) -> Op {
        Op::replace(pos, len, content, user, ts)
    }

    /// Both application orders of a transformed pair must converge.
    fn assert_tp1(s: &str, a: &Op, b: &Op) {
        let (a2, b2) = transform(a, b, true);
        let left = {
            let t = apply(s, a);
            b2.as_ref().map_or(t.clone(), |b2| apply(&t, b2))
        };
        let right = {
            let t = apply(s, b);
            a2.as_ref().map_or(t.clone(), |a2| apply(&t, a2))
        };
        assert_eq!(left, right, "TP1 violated for {:?} / {:?}", a, b);
    }

    #[test]
    fn apply_insert() {
        let op = ins(5, " world", "u1", 1);
        assert_eq!(apply("hello", &op), "hello world");
    }

    #[test]
    fn apply_insert_multibyte() {
        let op = ins(1, "é", "u1", 1);
        assert_eq!(apply("aö", &op), "aéö");
    }

    #[test]
    fn apply_delete() {
        let op = del(5, 6, "u1", 1);
        assert_eq!(apply("hello world", &op), "hello");
    }

    #[test]
    fn apply_replace() {
        let op = rep(0, 5, "howdy", "u1", 1);
        assert_eq!(apply("hello world", &op), "howdy world");
    }

    #[test]
    fn apply_retain_is_identity() {
        let op = Op::retain("u1", 1);
        assert_eq!(apply("hello", &op), "hello");
    }

    #[test]
    fn apply_clamps_out_of_range() {
        assert_eq!(apply("abc", &ins(99, "x", "u1", 1)), "abcx");
        assert_eq!(apply("abc", &del(1, 99, "u1", 1)), "a");
    }

    #[test]
    fn apply_preserves_length_relation() {
        let s = "0123456789";
        for op in [
            ins(3, "abc", "u1", 1),
            del(2, 4, "u1", 1),
            rep(1, 5, "xy", "u1", 1),
        ] {
            let expected =
                (s.chars().count() as isize + op.net_delta()) as usize;
            assert_eq!(apply(s, &op).chars().count(), expected);
        }
    }

    #[test]
    fn validate_rejects_bad_ops() {
        assert_eq!(
            ins(0, "", "u1", 1).validate(5),
            Err(OpValidationError::EmptyInsert)
        );
        assert_eq!(
            del(0, 0, "u1", 1).validate(5),
            Err(OpValidationError::ZeroLength)
        );
        assert!(matches!(
            del(3, 4, "u1", 1).validate(5),
            Err(OpValidationError::OutOfBounds { .. })
        ));
        assert!(matches!(
            Op::retain("u1", 1).validate(5),
            Err(OpValidationError::UnsupportedKind("retain"))
        ));
        assert!(ins(5, "x", "u1", 1).validate(5).is_ok());
        assert!(del(1, 4, "u1", 1).validate(5).is_ok());
    }

    #[test]
    fn transform_same_id_absorbs_second() {
        let a = ins(0, "x", "u1", 1);
        let mut b = a.clone();
        b.user_id = "u2".to_string();
        let (a2, b2) = transform(&a, &b, false);
        assert_eq!(a2, Some(a));
        assert!(b2.is_none());
    }

    #[test]
    fn transform_retain_identity() {
        let a = ins(3, "x", "u1", 1);
        let r = Op::retain("u2", 2);
        let (a2, r2) = transform(&a, &r, true);
        assert_eq!(a2, Some(a.clone()));
        assert_eq!(r2, Some(r.clone()));
        let (r3, a3) = transform(&r, &a, true);
        assert_eq!(r3, Some(r));
        assert_eq!(a3, Some(a));
    }

    #[test]
    fn transform_insert_insert_tie_priority_wins() {
        let a = ins(5, "X", "u1", 100);
        let b = ins(5, "Y", "u2", 101);
        let (a2, b2) = transform(&a, &b, true);
        assert_eq!(a2.unwrap().position, 5);
        assert_eq!(b2.unwrap().position, 6);

        let (a3, b3) = transform(&a, &b, false);
        assert_eq!(a3.unwrap().position, 6);
        assert_eq!(b3.unwrap().position, 5);
    }

    #[test]
    fn transform_insert_insert_disjoint() {
        let a = ins(1, "ab", "u1", 1);
        let b = ins(4, "c", "u2", 2);
        let (a2, b2) = transform(&a, &b, false);
        assert_eq!(a2.unwrap().position, 1);
        assert_eq!(b2.unwrap().position, 6);
    }

    #[test]
    fn tp1_insert_insert_exhaustive() {
        let s = "HELLO";
        for pa in 0..=s.len() {
            for pb in 0..=s.len() {
                let a = ins(pa, "X", "u1", 100);
                let b = ins(pb, "YZ", "u2", 101);
                assert_tp1(s, &a, &b);
            }
        }
    }

    #[test]
    fn transform_insert_before_delete_shifts_delete() {
        let a = ins(1, "xx", "u1", 1);
        let b = del(3, 2, "u2", 2);
        let (a2, b2) = transform(&a, &b, false);
        assert_eq!(a2.unwrap().position, 1);
        assert_eq!(b2.unwrap().position, 5);
    }

    #[test]
    fn transform_insert_after_delete_shifts_insert() {
        let a = ins(6, "x", "u1", 1);
        let b = del(1, 3, "u2", 2);
        let (a2, b2) = transform(&a, &b, false);
        assert_eq!(a2.unwrap().position, 3);
        assert_eq!(b2.unwrap(), b);
    }

    #[test]
    fn transform_insert_inside_delete_clamps_to_start() {
        // "ABCDEFGH": delete CDEF, insert * at 4 -> insert lands at 2.
        let d = del(2, 4, "u1", 200);
        let i = ins(4, "*", "u2", 201);
        let (i2, d2) = transform(&i, &d, false);
        assert_eq!(i2.unwrap().position, 2);
        assert_eq!(d2.unwrap(), d);
    }

    #[test]
    fn tp1_insert_delete_disjoint() {
        let s = "0123456789";
        // Insert at or before the deleted span, and past its end.
        for pa in 0..=3 {
            assert_tp1(s, &ins(pa, "XY", "u1", 1), &del(3, 4, "u2", 2));
        }
        for pa in 7..=10 {
            assert_tp1(s, &ins(pa, "XY", "u1", 1), &del(3, 4, "u2", 2));
        }
    }

    #[test]
    fn transform_insert_replace_cases() {
        // Before: replace shifts right.
        let (i2, r2) = transform(&ins(1, "ab", "u1", 1), &rep(3, 2, "Z", "u2", 2), false);
        assert_eq!(i2.unwrap().position, 1);
        assert_eq!(r2.unwrap().position, 5);

        // After: insert shifts by the replace's net delta.
        let (i2, r2) = transform(&ins(8, "a", "u1", 1), &rep(2, 3, "Z", "u2", 2), false);
        assert_eq!(i2.unwrap().position, 6);
        assert_eq!(r2.unwrap().position, 2);

        // Inside: insert lands just after the replacement text.
        let (i2, r2) = transform(&ins(3, "a", "u1", 1), &rep(2, 3, "XY", "u2", 2), false);
        assert_eq!(i2.unwrap().position, 4);
        assert_eq!(r2.unwrap().position, 2);
    }

    #[test]
    fn transform_delete_delete_disjoint() {
        let a = del(1, 2, "u1", 1);
        let b = del(5, 3, "u2", 2);
        let (a2, b2) = transform(&a, &b, false);
        assert_eq!(a2.unwrap(), a);
        assert_eq!(b2.unwrap().position, 3);
    }

    #[test]
    fn transform_delete_delete_overlapping() {
        // "0123456789": del [2,6) and del [4,8) overlap by 2.
        let a = del(2, 4, "u1", 300);
        let b = del(4, 4, "u2", 301);
        let (a2, b2) = transform(&a, &b, false);
        let a2 = a2.unwrap();
        let b2 = b2.unwrap();
        assert_eq!((a2.position, a2.kind.removed_len()), (2, 2));
        assert_eq!((b2.position, b2.kind.removed_len()), (2, 2));
        assert_eq!(apply(&apply("0123456789", &a), &b2), "0189");
        assert_eq!(apply(&apply("0123456789", &b), &a2), "0189");
    }

    #[test]
    fn transform_delete_delete_identical_absorbs_both() {
        let a = del(2, 4, "u1", 1);
        let b = del(2, 4, "u2", 2);
        let (a2, b2) = transform(&a, &b, false);
        assert!(a2.is_none());
        assert!(b2.is_none());
    }

    #[test]
    fn transform_delete_contains_other_absorbs_it() {
        let a = del(2, 6, "u1", 1);
        let b = del(4, 2, "u2", 2);
        let (a2, b2) = transform(&a, &b, false);
        let a2 = a2.unwrap();
        assert_eq!((a2.position, a2.kind.removed_len()), (2, 4));
        assert!(b2.is_none());
    }

    #[test]
    fn tp1_delete_delete_exhaustive() {
        let s = "0123456789";
        for pa in 0..=6 {
            for pb in 0..=6 {
                assert_tp1(s, &del(pa, 3, "u1", 1), &del(pb, 4, "u2", 2));
            }
        }
    }

    #[test]
    fn tp1_delete_replace_all_overlap_shapes() {
        let s = "0123456789";
        // Disjoint both ways, partial overlap both ways, and containment
        // both ways all converge.
        let cases = [
            (del(0, 2, "u1", 1), rep(5, 2, "XY", "u2", 2)),
            (del(7, 2, "u1", 1), rep(1, 3, "X", "u2", 2)),
            (del(2, 4, "u1", 1), rep(4, 4, "XY", "u2", 2)),
            (del(4, 4, "u1", 1), rep(2, 4, "XY", "u2", 2)),
            (del(2, 6, "u1", 1), rep(4, 2, "Z", "u2", 2)),
            (del(4, 2, "u1", 1), rep(2, 6, "XYZ", "u2", 2)),
            (del(2, 4, "u1", 1), rep(2, 4, "XY", "u2", 2)),
        ];
        for (d, r) in cases {
            assert_tp1(s, &d, &r);
            assert_tp1(s, &r, &d);
        }
    }

    #[test]
    fn transform_replace_replace_disjoint_shifts_by_net() {
        let a = rep(1, 2, "AAA", "u1", 1);
        let b = rep(5, 1, "B", "u2", 2);
        let (a2, b2) = transform(&a, &b, false);
        assert_eq!(a2.unwrap().position, 1);
        assert_eq!(b2.unwrap().position, 6);
        assert_tp1("0123456789", &a, &b);
    }

    #[test]
    fn transform_replace_replace_overlap_priority_wins() {
        let a = rep(2, 4, "AA", "u1", 1);
        let b = rep(4, 4, "BB", "u2", 2);
        let (a2, b2) = transform(&a, &b, true);
        assert_eq!(a2.unwrap(), a);
        assert!(b2.is_none());

        let (a3, b3) = transform(&a, &b, false);
        assert!(a3.is_none());
        assert_eq!(b3.unwrap(), b);
    }

    #[test]
    fn transform_against_respects_timestamp_order() {
        // An op only rebases past strictly earlier ops.
        let applied = vec![ins(0, "AB", "u1", 100), ins(9, "Z", "u3", 300)];
        let op = ins(4, "x", "u2", 200);
        let t = transform_against(&op, &applied).unwrap();
        // Shifted by the earlier insert only; the later one is skipped.
        assert_eq!(t.position, 6);
    }

    #[test]
    fn transform_against_ties_break_on_user_id() {
        let applied = vec![ins(0, "A", "u1", 100)];
        // Same timestamp, higher user id: the applied op counts as earlier.
        let op = ins(0, "B", "u2", 100);
        let t = transform_against(&op, &applied).unwrap();
        assert_eq!(t.position, 1);
        // Same timestamp, lower user id: nothing is earlier.
        let op = ins(0, "B", "u0", 100);
        let t = transform_against(&op, &applied).unwrap();
        assert_eq!(t.position, 0);
    }

    #[test]
    fn transform_against_absorption_returns_none() {
        let applied = vec![del(0, 5, "u1", 100)];
        let op = del(1, 3, "u2", 200);
        assert!(transform_against(&op, &applied).is_none());
    }

    #[test]
    fn merge_contiguous_insert_run() {
        let ops = vec![
            ins(5, "h", "u1", 1),
            ins(6, "e", "u1", 2),
            ins(7, "y", "u1", 3),
        ];
        let merged = merge_batch(ops);
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].kind,
            OpKind::Insert {
                content: "hey".to_string()
            }
        );
        assert_eq!(merged[0].position, 5);
    }

    #[test]
    fn merge_delete_run_at_same_position() {
        let ops = vec![del(3, 1, "u1", 1), del(3, 1, "u1", 2), del(3, 2, "u1", 3)];
        let merged = merge_batch(ops);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, OpKind::Delete { length: 4 });
    }

    #[test]
    fn merge_leaves_gaps_alone() {
        let ops = vec![ins(0, "a", "u1", 1), ins(5, "b", "u1", 2)];
        assert_eq!(merge_batch(ops).len(), 2);
    }

    #[test]
    fn merge_never_touches_replace() {
        let ops = vec![
            rep(0, 1, "a", "u1", 1),
            rep(1, 1, "b", "u1", 2),
        ];
        assert_eq!(merge_batch(ops).len(), 2);
    }

    #[test]
    fn merge_is_equivalent_to_sequential_application() {
        let s = "0123456789";
        let ops = vec![
            ins(2, "a", "u1", 1),
            ins(3, "b", "u1", 2),
            del(7, 1, "u1", 3),
            del(7, 1, "u1", 4),
        ];
        let merged = merge_batch(ops.clone());
        assert!(merged.len() < ops.len());
        assert_eq!(apply_all(s, &ops), apply_all(s, &merged));
    }

    #[test]
    fn op_wire_roundtrip() {
        let op = ins(3, "hé", "user-1", 42);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "insert");
        assert_eq!(json["position"], 3);
        assert_eq!(json["content"], "hé");
        assert_eq!(json["userId"], "user-1");
        let back: Op = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn op_wire_defaults_generated() {
        // A client op carries only the edit itself; server fields default.
        let op: Op = serde_json::from_str(
            r#"{"type":"delete","position":1,"length":2,"timestamp":7}"#,
        )
        .unwrap();
        assert_eq!(op.kind, OpKind::Delete { length: 2 });
        assert!(!op.id.is_empty());
        assert_eq!(op.version, 0);
        assert!(!op.applied);
    }
}
