use std::collections::BTreeSet;

use autofix_pipeline::{
    DocumentPolicy, PatchEngine, PatchError, PatchRequest, Phase, PipelineDocument, Step,
    Unguarded,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use proptest::sample::subsequence;
use serde_yaml::Value;

const POOL: &[&str] = &[
    "Set up Python",
    "Install system dependencies",
    "Configure pip mirror",
    "Clean Disk Space",
    "Build APK",
    "Verify Build Log",
    "Check Disk Space After Build",
    "Save Build Log",
    "Upload APK",
    "Set Custom Temp Directory",
];

fn policy() -> DocumentPolicy {
    DocumentPolicy::default().with_golden_steps(Vec::<String>::new())
}

fn doc_from(names: &[&str]) -> PipelineDocument {
    let steps = names
        .iter()
        .map(|n| Step::run(*n, format!("echo {n}")))
        .collect();
    PipelineDocument::new(&policy()).with_steps(steps)
}

fn fragment(name: &str, script: &str) -> Value {
    serde_yaml::from_str(&format!("- name: {name}\n  run: echo {script}\n")).unwrap()
}

fn step_names() -> impl Strategy<Value = Vec<&'static str>> {
    subsequence(POOL.to_vec(), 1..POOL.len()).prop_shuffle()
}

#[test]
fn reordering_law() {
    let mut doc = doc_from(&["Build APK", "Install Tools", "Upload APK", "Verify Build Log"]);
    doc.normalize(&policy(), &Unguarded);
    assert_eq!(
        doc.identities(),
        vec!["Install Tools", "Build APK", "Verify Build Log", "Upload APK"]
    );
}

#[test]
fn boolean_trigger_normalizes_to_push() {
    let text = "name: CI\non: true\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - name: Build APK\n        run: make\n";
    let doc = PipelineDocument::parse(text, &policy()).unwrap();
    assert!(doc.trigger().contains_key("push"));
}

proptest! {
    #[test]
    fn prop_add_is_idempotent(names in step_names(), script in "[a-z]{1,12}") {
        let engine = PatchEngine::new(policy());
        let doc = doc_from(&names);
        let request = PatchRequest::add("Install Remedy", fragment("Install Remedy", &script));

        let once = engine.apply(&doc, &request, &Unguarded).unwrap();
        let rendered = once.to_yaml().unwrap();

        let second = engine.apply(&once, &request, &Unguarded);
        prop_assert!(matches!(second, Err(PatchError::DuplicateStep(_))));
        prop_assert_eq!(once.to_yaml().unwrap(), rendered);
    }

    #[test]
    fn prop_protected_steps_are_immutable(
        names in step_names(),
        pick in any::<prop::sample::Index>(),
        script in "[a-z]{1,12}",
    ) {
        let engine = PatchEngine::new(policy());
        let doc = doc_from(&names);
        let protected_name = *pick.get(&names);
        let guard: BTreeSet<String> = [protected_name.to_string()].into();
        let before = doc.to_yaml().unwrap();

        let replace = PatchRequest::modify(
            protected_name,
            fragment(protected_name, &script),
            protected_name,
        );
        let add = PatchRequest::add(protected_name, fragment(protected_name, &script));
        let displace = PatchRequest::modify(
            "Replacement Step",
            fragment("Replacement Step", &script),
            protected_name,
        );

        for request in [replace, add, displace] {
            let result = engine.apply(&doc, &request, &guard);
            prop_assert!(matches!(result, Err(PatchError::ProtectedStep(_))));
        }
        prop_assert_eq!(doc.to_yaml().unwrap(), before);
    }

    #[test]
    fn prop_patched_steps_are_phase_sorted_and_stable(names in step_names()) {
        let engine = PatchEngine::new(policy());
        let doc = doc_from(&names);
        let request = PatchRequest::add("Remedy Step", fragment("Remedy Step", "true"));
        let patched = engine.apply(&doc, &request, &Unguarded).unwrap();

        let phases: Vec<Phase> = patched.steps().iter().map(Step::phase).collect();
        prop_assert!(phases.windows(2).all(|w| w[0] <= w[1]));

        for phase in [Phase::Preparation, Phase::Build, Phase::Verification, Phase::Publish] {
            let original: Vec<&str> = names
                .iter()
                .copied()
                .filter(|n| Phase::classify(n) == phase)
                .collect();
            let kept: Vec<&str> = patched
                .identities()
                .into_iter()
                .filter(|n| *n != "Remedy Step" && Phase::classify(n) == phase)
                .collect();
            prop_assert_eq!(original, kept);
        }
    }
}
