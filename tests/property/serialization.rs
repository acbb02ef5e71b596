#![allow(clippy::unwrap_used)]

//! Property-based codec tests.
//!
//! Uses proptest to verify:
//! 1. Any task list survives encode → decode unchanged.
//! 2. Encoding is deterministic for equal lists.
//! 3. Arbitrary input never makes `decode` panic.

use proptest::prelude::*;
use taskftp_proto::codec;
use taskftp_proto::{Task, TaskId, TaskList};

/// Strategy for task ids: either generated-style hex or arbitrary visible text.
fn arb_task_id() -> impl Strategy<Value = TaskId> {
    prop_oneof![
        any::<u128>().prop_map(|n| TaskId::new(format!("{n:032x}"))),
        "[A-Za-z0-9_.:<>&\"' -]{1,40}".prop_map(TaskId::new),
    ]
}

/// Strategy for single-line text. The codec trims, so generated values are
/// trimmed up front.
fn arb_line() -> impl Strategy<Value = String> {
    "[^\\x00-\\x1f\\x7f]{0,80}".prop_map(|s| s.trim().to_string())
}

/// Strategy for multi-line comments.
fn arb_comment() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_line(), 0..4).prop_map(|lines| lines.join("\n").trim().to_string())
}

/// Strategy for due dates. `-1` is the wire sentinel for "none", so it is
/// never produced as a real date.
fn arb_due() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        Just(None),
        (0i64..4_102_444_800).prop_map(Some),
        (i64::MIN..-1).prop_map(Some),
    ]
}

fn arb_task() -> impl Strategy<Value = Task> {
    (arb_task_id(), arb_line(), any::<bool>(), arb_due(), arb_comment()).prop_map(
        |(id, title, done, due, comment)| Task {
            id,
            title,
            done,
            due,
            comment,
        },
    )
}

fn arb_task_list() -> impl Strategy<Value = TaskList> {
    prop::collection::vec(arb_task(), 0..16).prop_map(|tasks| tasks.into_iter().collect())
}

proptest! {
    #[test]
    fn task_list_round_trip(list in arb_task_list()) {
        let xml = codec::encode(&list);
        let decoded = codec::decode(&xml).unwrap();
        prop_assert_eq!(decoded, list);
    }

    #[test]
    fn encoding_is_deterministic(list in arb_task_list()) {
        let rebuilt: TaskList = list.iter().rev().cloned().collect();
        prop_assert_eq!(codec::encode(&list), codec::encode(&rebuilt));
    }

    #[test]
    fn decode_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_bytes(&bytes);
    }

    #[test]
    fn decode_arbitrary_text_never_panics(text in "(<[a-z/]{0,8}[ =\"a-z0-9]{0,12}>|[a-z &;]{0,6}){0,24}") {
        let _ = codec::decode(&text);
    }
}
