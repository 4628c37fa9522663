//! Tracker state machine tests against the simulated import machinery.

mod common;

use common::{
    call, dunder_import, from_imp, imp, import_module, set, Action, SimHost,
};
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};
use testprune::tracker::{Tracker, TrackerConfig};
use testprune::Error;

fn tracker(prefix: &str) -> Tracker {
    Tracker::new(TrackerConfig::with_prefixes([prefix]))
}

fn dynamic_tracker(
    prefix: &str,
    anchors: &[(&str, &[&str])],
    ignores: &[(&str, &[&str])],
) -> Tracker {
    let to_map = |entries: &[(&str, &[&str])]| -> BTreeMap<String, BTreeSet<String>> {
        entries
            .iter()
            .map(|(m, fns)| {
                (
                    m.to_string(),
                    fns.iter().map(|f| f.to_string()).collect(),
                )
            })
            .collect()
    };
    let mut cfg = TrackerConfig::with_prefixes([prefix]);
    cfg.record_dynamic = true;
    cfg.dynamic_anchors = to_map(anchors);
    cfg.dynamic_ignores = to_map(ignores);
    Tracker::new(cfg)
}

fn simple_host() -> SimHost {
    SimHost::new()
        .module("simple", vec![])
        .module("simple.foo", vec![])
        .module("simple.foo.qux", vec![])
}

#[test]
fn test_import_statement_tracks_parents() {
    let mut t = tracker("simple");
    let mut host = simple_host();
    host.import_(&mut t, "simple.foo.qux").unwrap();

    assert_eq!(t.deps_of("simple").unwrap(), set(&[]));
    assert_eq!(t.deps_of("simple.foo").unwrap(), set(&["simple"]));
    assert_eq!(
        t.deps_of("simple.foo.qux").unwrap(),
        set(&["simple", "simple.foo"])
    );
}

#[test]
fn test_from_import_of_module() {
    let mut t = tracker("simple");
    let mut host = simple_host();
    host.from_import(&mut t, "simple.foo", &["qux"]).unwrap();

    assert_eq!(
        t.deps_of("simple.foo.qux").unwrap(),
        set(&["simple", "simple.foo"])
    );
}

#[test]
fn test_untracked_prefix_is_forwarded_untouched() {
    let mut t = tracker("simple");
    let mut host = simple_host().module("other", vec![]);
    host.import_(&mut t, "other").unwrap();

    assert!(t.deps_of("other").is_none());
    assert!(host.is_loaded("other"));
}

#[test]
fn test_transitive_deps_through_intermediate() {
    let mut t = tracker("simple");
    let mut host = simple_host()
        .module("simple.baz", vec![imp("simple.foo.qux")])
        .module("simple.bar", vec![imp("simple.baz")]);
    host.import_(&mut t, "simple.bar").unwrap();

    assert_eq!(
        t.deps_of("simple.baz").unwrap(),
        set(&["simple", "simple.foo", "simple.foo.qux"])
    );
    assert_eq!(
        t.deps_of("simple.bar").unwrap(),
        set(&["simple", "simple.baz", "simple.foo", "simple.foo.qux"])
    );
}

#[test]
fn test_repeat_imports_reuse_tracked_closures() {
    let mut t = tracker("repeated");
    let mut host = SimHost::new()
        .module("repeated", vec![])
        .module("repeated.old", vec![])
        .module("repeated.same", vec![imp("repeated.old")])
        .module("repeated.one", vec![from_imp("repeated", &["same"])])
        .module("repeated.two", vec![from_imp("repeated", &["same"])])
        .module("repeated.three", vec![from_imp("repeated", &["same"])]);
    for m in ["repeated.one", "repeated.two", "repeated.three"] {
        host.import_(&mut t, m).unwrap();
    }

    let expected = set(&["repeated", "repeated.same", "repeated.old"]);
    assert_eq!(t.deps_of("repeated.same").unwrap(), set(&["repeated", "repeated.old"]));
    for m in ["repeated.one", "repeated.two", "repeated.three"] {
        assert_eq!(t.deps_of(m).unwrap(), expected, "{}", m);
    }
}

#[test]
fn test_sibling_cycle_consolidation() {
    for start in ["cycles.a", "cycles.b", "cycles.c"] {
        let mut t = tracker("cycles");
        let mut host = SimHost::new()
            .module("cycles", vec![])
            .module("cycles.a", vec![imp("cycles.b")])
            .module("cycles.b", vec![imp("cycles.c")])
            .module("cycles.c", vec![imp("cycles.a")]);
        host.import_(&mut t, start).unwrap();

        let expected = set(&["cycles", "cycles.a", "cycles.b", "cycles.c"]);
        for m in ["cycles.a", "cycles.b", "cycles.c"] {
            assert_eq!(t.deps_of(m).unwrap(), expected, "start={} m={}", start, m);
        }
        // object-identical, not merely equal
        assert!(t.shares_deps("cycles.a", "cycles.b"));
        assert!(t.shares_deps("cycles.b", "cycles.c"));
        assert!(!t.shares_deps("cycles", "cycles.a"));
    }
}

#[test]
fn test_nested_package_cycle() {
    let mut t = tracker("cycles");
    let mut host = SimHost::new()
        .module("cycles", vec![])
        .module("cycles.foo", vec![imp("cycles.foo.bar")])
        .module("cycles.foo.bar", vec![imp("cycles.foo.bar.baz")])
        .module("cycles.foo.bar.baz", vec![imp("cycles.foo")]);
    host.import_(&mut t, "cycles.foo.bar.baz").unwrap();

    let expected = set(&[
        "cycles",
        "cycles.foo",
        "cycles.foo.bar",
        "cycles.foo.bar.baz",
    ]);
    for m in ["cycles.foo", "cycles.foo.bar", "cycles.foo.bar.baz"] {
        assert_eq!(t.deps_of(m).unwrap(), expected, "{}", m);
        assert!(t.shares_deps(m, "cycles.foo"));
    }
}

#[test]
fn test_cycle_reentry_growth_visible_through_all_members() {
    let mut t = tracker("cycles");
    let mut host = SimHost::new()
        .module("cycles", vec![])
        .module("cycles.a", vec![imp("cycles.b"), imp("cycles.d")])
        .module("cycles.b", vec![imp("cycles.c")])
        .module("cycles.c", vec![imp("cycles.a")])
        .module("cycles.d", vec![]);
    host.import_(&mut t, "cycles.a").unwrap();

    // d was imported after the cycle consolidated; the shared set grew
    // through a and is observed via b and c
    for m in ["cycles.a", "cycles.b", "cycles.c"] {
        assert!(t.deps_of(m).unwrap().contains("cycles.d"), "{}", m);
    }
    assert!(t.shares_deps("cycles.a", "cycles.c"));
}

#[test]
fn test_failed_import_rolls_back_fresh_entry() {
    let mut t = tracker("pkg");
    let mut host = SimHost::new()
        .module("pkg", vec![])
        .module("pkg.good", vec![])
        .module(
            "pkg.flaky",
            vec![imp("pkg.good"), Action::Fail("boom".to_string())],
        );
    assert!(host.import_(&mut t, "pkg.flaky").is_err());

    // the fresh entry is rolled back, but whatever it managed to load stays
    assert!(t.deps_of("pkg.flaky").is_none());
    assert!(t.deps_of("pkg.good").is_some());
    let root = t.deps_of("").unwrap();
    assert!(root.contains("pkg.good"));
    assert!(!root.contains("pkg.flaky"));
    // the host evicted the partially initialized module
    assert!(!host.is_loaded("pkg.flaky"));
    assert!(host.is_loaded("pkg.good"));
}

#[test]
fn test_failed_import_inside_module_keeps_partial_deps() {
    let mut t = tracker("pkg");
    let mut host = SimHost::new()
        .module("pkg", vec![])
        .module("pkg.good", vec![])
        .module(
            "pkg.flaky",
            vec![imp("pkg.good"), Action::Fail("boom".to_string())],
        )
        .module(
            "pkg.tolerant",
            vec![Action::TryImport("pkg.flaky".to_string())],
        );
    host.import_(&mut t, "pkg.tolerant").unwrap();

    // transitive loads of the failed module survive, the failed name does not
    assert_eq!(
        t.deps_of("pkg.tolerant").unwrap(),
        set(&["pkg", "pkg.good"])
    );
    assert!(t.deps_of("pkg.flaky").is_none());
}

#[test]
fn test_missing_module_error() {
    let mut t = tracker("pkg");
    let mut host = SimHost::new().module("pkg", vec![]);
    assert!(host.import_(&mut t, "pkg.ghost").is_err());
    assert!(t.deps_of("pkg.ghost").is_none());
    assert!(!t.deps_of("").unwrap().contains("pkg.ghost"));
}

fn dynamic_fixture() -> SimHost {
    // a imports b, then calls its own helper, which calls a function in c
    // that performs the actual dynamic import
    SimHost::new()
        .module("dynamic", vec![])
        .module("dynamic.direct", vec![])
        .module("dynamic.anchored", vec![])
        .module(
            "dynamic.anchored.a",
            vec![imp("dynamic.anchored.b"), call("dynamic.anchored.a", "lolwut")],
        )
        .function(
            "dynamic.anchored.a",
            "lolwut",
            vec![call("dynamic.anchored.c", "bla")],
        )
        .module("dynamic.anchored.b", vec![imp("dynamic.anchored.c")])
        .module("dynamic.anchored.c", vec![])
        .function(
            "dynamic.anchored.c",
            "bla",
            vec![dunder_import("dynamic.direct")],
        )
}

#[test]
fn test_dynamic_without_anchor_picks_deepest_frame() {
    let mut t = dynamic_tracker("dynamic", &[], &[]);
    let mut host = dynamic_fixture();
    host.import_(&mut t, "dynamic.anchored.a").unwrap();

    // the dynamic load happened while `a` was in flight, so `a` owns it
    assert!(t.deps_of("dynamic.anchored.a").unwrap().contains("dynamic.direct"));
    assert!(!t.deps_of("dynamic.anchored.c").unwrap().contains("dynamic.direct"));

    let anchor = (
        "dynamic.anchored.c".to_string(),
        "bla".to_string(),
    );
    assert_eq!(
        t.dynamic_imports_of(&anchor).unwrap(),
        &set(&["dynamic.direct"])
    );
    assert_eq!(
        t.dynamic_users_of("dynamic.anchored.a").unwrap(),
        &std::collections::HashSet::from([anchor])
    );
}

#[test]
fn test_dynamic_with_anchor_picks_anchor() {
    let mut t = dynamic_tracker("dynamic", &[("dynamic.anchored.b", &["gloop"])], &[]);
    let mut host = SimHost::new()
        .module("dynamic", vec![])
        .module("dynamic.direct", vec![])
        .module("dynamic.anchored", vec![])
        .module(
            "dynamic.anchored.a",
            vec![imp("dynamic.anchored.b"), call("dynamic.anchored.b", "gloop")],
        )
        .module("dynamic.anchored.b", vec![])
        .function(
            "dynamic.anchored.b",
            "gloop",
            vec![import_module("dynamic.direct")],
        );
    host.import_(&mut t, "dynamic.anchored.a").unwrap();

    let anchor = (
        "dynamic.anchored.b".to_string(),
        "gloop".to_string(),
    );
    assert_eq!(
        t.dynamic_imports_of(&anchor).unwrap(),
        &set(&["dynamic.direct"])
    );
    assert_eq!(
        t.dynamic_users_of("dynamic.anchored.a").unwrap(),
        &std::collections::HashSet::from([anchor])
    );
}

#[test]
fn test_overlapping_anchors_pick_outermost() {
    let mut t = dynamic_tracker(
        "dynamic",
        &[
            ("dynamic.anchored.a", &["lolwut"]),
            ("dynamic.anchored.c", &["bla"]),
        ],
        &[],
    );
    let mut host = dynamic_fixture();
    host.import_(&mut t, "dynamic.anchored.a").unwrap();

    let outer = ("dynamic.anchored.a".to_string(), "lolwut".to_string());
    let inner = ("dynamic.anchored.c".to_string(), "bla".to_string());
    assert_eq!(
        t.dynamic_imports_of(&outer).unwrap(),
        &set(&["dynamic.direct"])
    );
    assert!(t.dynamic_imports_of(&inner).is_none());
}

#[test]
fn test_dynamic_ignores_suppress_attribution() {
    let mut t = dynamic_tracker("dynamic", &[], &[("dynamic.by_caller", &["import_by_name"])]);
    let mut host = SimHost::new()
        .module("dynamic", vec![])
        .module("dynamic._foo", vec![])
        .module("dynamic.by_caller", vec![])
        .function(
            "dynamic.by_caller",
            "import_by_name",
            vec![import_module("dynamic._foo")],
        )
        .module(
            "dynamic.qux",
            vec![imp("dynamic.by_caller"), call("dynamic.by_caller", "import_by_name")],
        );
    host.import_(&mut t, "dynamic.qux").unwrap();

    // ignored: treated as a static import, no dynamic bookkeeping at all
    assert!(t.deps_of("dynamic.qux").unwrap().contains("dynamic._foo"));
    assert!(t.dynamic_users_of("dynamic.qux").is_none());
    assert!(t.unattributed_dynamic().is_empty());
}

#[test]
fn test_with_dynamic_merges_anchor_imports() {
    let mut t = dynamic_tracker("dynamic", &[("dynamic.by_caller", &["import_by_caller"])], &[]);
    let mut host = SimHost::new()
        .module("dynamic", vec![])
        .module("dynamic._foo", vec![])
        .module("dynamic._bar", vec![])
        .module("dynamic.by_caller", vec![])
        .function(
            "dynamic.by_caller",
            "import_by_caller",
            vec![import_module("dynamic._foo"), import_module("dynamic._bar")],
        )
        .module(
            "dynamic.all_qux",
            vec![
                imp("dynamic.by_caller"),
                call("dynamic.by_caller", "import_by_caller"),
            ],
        );
    host.import_(&mut t, "dynamic.all_qux").unwrap();

    let with_dynamic = t.with_dynamic("dynamic.all_qux").unwrap();
    assert!(with_dynamic.contains("dynamic._foo"));
    assert!(with_dynamic.contains("dynamic._bar"));
    assert!(with_dynamic.contains("dynamic.by_caller"));
}

#[test]
fn test_dynamic_users_propagate_to_importers() {
    let mut t = dynamic_tracker("dynamic", &[("dynamic.by_caller", &["import_by_caller"])], &[]);
    let mut host = SimHost::new()
        .module("dynamic", vec![])
        .module("dynamic._foo", vec![])
        .module("dynamic.by_caller", vec![])
        .function(
            "dynamic.by_caller",
            "import_by_caller",
            vec![import_module("dynamic._foo")],
        )
        .module(
            "dynamic.all_qux",
            vec![
                imp("dynamic.by_caller"),
                call("dynamic.by_caller", "import_by_caller"),
            ],
        )
        .module("dynamic.and_more", vec![imp("dynamic.all_qux")]);
    host.import_(&mut t, "dynamic.all_qux").unwrap();
    host.import_(&mut t, "dynamic.and_more").unwrap();

    // a module importing a dynamic user inherits its anchors
    let with_dynamic = t.with_dynamic("dynamic.and_more").unwrap();
    assert!(with_dynamic.contains("dynamic._foo"));
}

#[test]
fn test_anchored_call_after_load_records_users() {
    let mut t = dynamic_tracker("dynamic", &[("dynamic.by_caller", &["Importer.by_name"])], &[]);
    let mut host = SimHost::new()
        .module("dynamic", vec![])
        .module("dynamic._foo", vec![])
        .module("dynamic.by_caller", vec![])
        .function(
            "dynamic.by_caller",
            "by_name",
            vec![import_module("dynamic._foo")],
        )
        .module("dynamic.caller", vec![imp("dynamic.by_caller")])
        .function(
            "dynamic.caller",
            "run",
            vec![call("dynamic.by_caller", "by_name")],
        );
    host.import_(&mut t, "dynamic.caller").unwrap();
    // the dynamic import happens after dynamic.caller finished loading
    host.call_function(&mut t, "dynamic.caller", "run").unwrap();

    let with_dynamic = t.with_dynamic("dynamic.caller").unwrap();
    assert!(with_dynamic.contains("dynamic._foo"));
    assert!(!t.deps_of("dynamic.caller").unwrap().contains("dynamic._foo"));
}

#[test]
fn test_unattributed_dynamic_import_is_recorded() {
    let mut t = dynamic_tracker("dynamic", &[], &[]);
    let mut host = SimHost::new()
        .module("dynamic", vec![])
        .module("dynamic.direct", vec![]);
    host.import_module(&mut t, "dynamic.direct").unwrap();

    // driver frames are not tracked modules: no anchor candidate exists,
    // and the implicit parent load does not double-report
    assert_eq!(t.unattributed_dynamic().len(), 1);
}

#[test]
fn test_explicit_import_call_is_dynamic() {
    let mut t = dynamic_tracker("simple", &[], &[]);
    let mut host = simple_host();
    host.explicit_import(&mut t, "simple.foo").unwrap();

    assert_eq!(t.unattributed_dynamic().len(), 1);
    assert_eq!(t.deps_of("simple.foo").unwrap(), set(&["simple"]));
}

#[test]
fn test_patches_applied_after_load() {
    let mut cfg = TrackerConfig::with_prefixes(["simple"]);
    cfg.patches = [(
        "simple.foo".to_string(),
        vec!["var".to_string(), "Bar.method".to_string()],
    )]
    .into_iter()
    .collect();
    let mut t = Tracker::new(cfg);
    let mut host = simple_host();
    host.import_(&mut t, "simple.foo").unwrap();

    assert_eq!(
        host.patched,
        vec![
            ("simple.foo".to_string(), "var".to_string()),
            ("simple.foo".to_string(), "Bar.method".to_string()),
        ]
    );
}

#[test]
fn test_enter_exit_context() {
    let mut t = tracker("pkg");
    let mut host = SimHost::new().module("pkg", vec![]).module("pkg.x", vec![]);

    t.enter_context("ctx");
    host.import_(&mut t, "pkg.x").unwrap();
    t.exit_context("ctx").unwrap();

    let ctx = t.deps_of("ctx").unwrap();
    assert!(ctx.contains("pkg.x"));
    assert!(ctx.contains("pkg"));
}

#[test]
fn test_exit_context_mismatch() {
    let mut t = tracker("pkg");
    t.enter_context("one");
    let err = t.exit_context("two").unwrap_err();
    match err {
        Error::ContextMismatch { actual, expected } => {
            assert_eq!(actual, "one");
            assert_eq!(expected, "two");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_forget_drops_tracking_state() {
    let mut t = tracker("simple");
    let mut host = simple_host();
    host.import_(&mut t, "simple.foo").unwrap();
    assert!(t.deps_of("simple.foo").is_some());
    t.forget("simple.foo");
    assert!(t.deps_of("simple.foo").is_none());
}
