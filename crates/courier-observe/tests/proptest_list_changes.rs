//! Property-based tests for observable list change notifications.
//!
//! 1. Applying every emitted change, in order, to a shadow copy keeps the
//!    shadow equal to the list, for any sequence of operations.
//! 2. Bulk removal emits non-overlapping runs whose total length is the
//!    number of removed items.
//! 3. Scalar writes notify exactly when the value changes.

use std::sync::Arc;

use courier_core::{DispatchConfig, Intent, Registry, Subscriber};
use courier_observe::{
    ChangeExt, ChangeKind, FieldDecl, ListChange, ObservableFields, ObservableList,
    ObservableSource,
};
use parking_lot::Mutex;
use proptest::prelude::*;

struct Deck;

impl ObservableFields for Deck {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::list::<u8>("cards"),
            FieldDecl::scalar("top", 0_u8),
        ]
    }
}

#[derive(Default)]
struct Shadow {
    items: Mutex<Vec<u8>>,
    changes: Mutex<Vec<ListChange>>,
}

impl Shadow {
    fn apply(&self, intent: &Intent) {
        let Some(list) = intent.new_value::<ObservableList<u8>>() else {
            return;
        };
        let current = list.snapshot();
        let mut items = self.items.lock();
        let Some(change) = intent.list_change() else {
            *items = current;
            return;
        };
        self.changes.lock().push(change);
        let (pos, len) = (change.range.position, change.range.length);
        match change.kind {
            ChangeKind::Insert => {
                items.splice(pos..pos, current[pos..pos + len].iter().copied());
            }
            ChangeKind::Remove => {
                items.drain(pos..pos + len);
            }
            ChangeKind::Replace => {
                items[pos..pos + len].copy_from_slice(&current[pos..pos + len]);
            }
            ChangeKind::Move { to } => {
                let item = items.remove(pos);
                items.insert(to, item);
            }
            ChangeKind::Reload => *items = current,
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Push(u8),
    Insert(usize, u8),
    InsertAll(usize, Vec<u8>),
    RemoveAt(usize),
    RemoveRange(usize, usize),
    Replace(usize, u8),
    Move(usize, usize),
    RetainEven,
    RemoveAll(Vec<u8>),
    Clear,
    Reload(Vec<u8>),
}

fn deck() -> (Arc<ObservableSource>, ObservableList<u8>, Arc<Shadow>) {
    let registry = Registry::new();
    let source = ObservableSource::with_config::<Deck>(&registry, DispatchConfig::new().lenient());
    let list = source
        .get::<ObservableList<u8>>("cards")
        .expect("cards is a list");
    let shadow = Arc::new(Shadow::default());
    source.bind(
        "cards",
        Subscriber::new(&shadow, "apply", |s: &Shadow, intent: &Intent| s.apply(intent)),
    );
    (source, list, shadow)
}

fn run(list: &ObservableList<u8>, op: &Op) {
    // Out-of-range indices are exercised too; they must change nothing.
    match op {
        Op::Push(v) => list.push(*v),
        Op::Insert(i, v) => {
            let _ = list.insert(*i, *v);
        }
        Op::InsertAll(i, vs) => {
            let _ = list.insert_all(*i, vs.iter().copied());
        }
        Op::RemoveAt(i) => {
            let _ = list.remove_at(*i);
        }
        Op::RemoveRange(a, n) => {
            let _ = list.remove_range(*a..a.saturating_add(*n));
        }
        Op::Replace(i, v) => {
            let _ = list.replace_at(*i, *v);
        }
        Op::Move(a, b) => {
            let _ = list.move_item(*a, *b);
        }
        Op::RetainEven => list.retain(|v| v % 2 == 0),
        Op::RemoveAll(vs) => list.remove_all(vs),
        Op::Clear => list.clear(),
        Op::Reload(vs) => list.reload(vs.clone()),
    }
}

// ── Strategies ────────────────────────────────────────────────────────────

fn small_vec() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(0u8..16, 0..6)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u8>().prop_map(Op::Push),
        2 => (0usize..12, any::<u8>()).prop_map(|(i, v)| Op::Insert(i, v)),
        2 => (0usize..12, small_vec()).prop_map(|(i, vs)| Op::InsertAll(i, vs)),
        2 => (0usize..12).prop_map(Op::RemoveAt),
        1 => (0usize..12, 0usize..4).prop_map(|(a, n)| Op::RemoveRange(a, n)),
        2 => (0usize..12, any::<u8>()).prop_map(|(i, v)| Op::Replace(i, v)),
        2 => (0usize..12, 0usize..12).prop_map(|(a, b)| Op::Move(a, b)),
        1 => Just(Op::RetainEven),
        1 => small_vec().prop_map(Op::RemoveAll),
        1 => Just(Op::Clear),
        1 => small_vec().prop_map(Op::Reload),
    ]
}

// 1. Shadow replay

proptest! {
    #[test]
    fn replaying_changes_tracks_the_list(ops in proptest::collection::vec(op(), 1..40)) {
        let (_source, list, shadow) = deck();
        for op in &ops {
            run(&list, op);
            prop_assert_eq!(&*shadow.items.lock(), &list.snapshot(), "after {:?}", op);
        }
    }
}

// 2. Bulk removal runs

proptest! {
    #[test]
    fn bulk_removal_runs_cover_removed_items(
        items in proptest::collection::vec(0u8..8, 0..30),
        drop_set in proptest::collection::vec(0u8..8, 0..4),
    ) {
        let (_source, list, shadow) = deck();
        list.reload(items.clone());
        shadow.changes.lock().clear();

        list.remove_all(&drop_set);
        let removed = items.iter().filter(|v| drop_set.contains(v)).count();
        let changes = shadow.changes.lock();
        let total: usize = changes.iter().map(|c| c.range.length).sum();
        prop_assert_eq!(total, removed);
        prop_assert!(changes.iter().all(|c| c.kind == ChangeKind::Remove && c.range.length > 0));
        for pair in changes.windows(2) {
            // Runs are separated by at least one kept item.
            prop_assert!(pair[1].range.position > pair[0].range.position);
        }
    }
}

// 3. Scalar change detection

proptest! {
    #[test]
    fn scalar_notifies_only_on_change(values in proptest::collection::vec(0u8..4, 1..30)) {
        let registry = Registry::new();
        let source = ObservableSource::with_config::<Deck>(&registry, DispatchConfig::new().lenient());
        let hits = Arc::new(Mutex::new(Vec::new()));
        source.bind(
            "top",
            Subscriber::new(&hits, "top", |seen: &Mutex<Vec<(u8, u8)>>, intent: &Intent| {
                if !intent.is_sticky_replay()
                    && let (Some(old), Some(new)) = (intent.old_value::<u8>(), intent.new_value::<u8>())
                {
                    seen.lock().push((*old, *new));
                }
            }),
        );

        let mut expected = Vec::new();
        let mut current = 0u8;
        for &v in &values {
            prop_assert_eq!(source.set("top", v), v != current);
            if v != current {
                expected.push((current, v));
                current = v;
            }
        }
        prop_assert_eq!(&*hits.lock(), &expected);
    }
}
