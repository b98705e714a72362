//! Property-based tests for path canonicalization and task naming.

use localpath_provisioner::paths::{clean_absolute, join, split_parent};
use localpath_provisioner::types::VolumeMode;
use localpath_provisioner::worker::{task_name, ModelCacheOptions, VolumeOptions, WorkerAction};
use proptest::prelude::*;

/// Path segments including the awkward ones.
fn any_segment() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-z0-9_-]{1,8}",
        1 => Just(".".to_string()),
        1 => Just("..".to_string()),
        1 => Just(String::new()),
    ]
}

fn any_absolute_path() -> impl Strategy<Value = String> {
    (proptest::collection::vec(any_segment(), 0..8), any::<bool>()).prop_map(|(segs, trailing)| {
        let mut p = format!("/{}", segs.join("/"));
        if trailing {
            p.push('/');
        }
        p
    })
}

fn any_action() -> impl Strategy<Value = WorkerAction> {
    prop_oneof![Just(WorkerAction::Create), Just(WorkerAction::Delete)]
}

fn cache_opts(node: &str, path: &str) -> VolumeOptions {
    VolumeOptions {
        name: "pvc".to_string(),
        path: path.to_string(),
        mode: VolumeMode::Filesystem,
        size_bytes: 0,
        node: node.to_string(),
        model_cache: Some(ModelCacheOptions {
            registry: "r".to_string(),
            store_type: "oci".to_string(),
            repo_tag: None,
            base_path: "/data".to_string(),
        }),
    }
}

proptest! {
    #[test]
    fn test_clean_is_idempotent(path in any_absolute_path()) {
        let once = clean_absolute(&path).unwrap();
        prop_assert_eq!(clean_absolute(&once).unwrap(), once.clone());
        prop_assert!(once.starts_with('/'));
        prop_assert!(once == "/" || !once.ends_with('/'));
        prop_assert!(!once.split('/').any(|s| s == "." || s == ".."));
    }

    #[test]
    fn test_trailing_separator_ignored(path in any_absolute_path()) {
        let with_slash = format!("{}/", path);
        prop_assert_eq!(clean_absolute(&path), clean_absolute(&with_slash));
    }

    #[test]
    fn test_relative_paths_rejected(seg in "[a-z]{1,8}", rest in any_absolute_path()) {
        let relative = format!("{}{}", seg, rest);
        prop_assert!(clean_absolute(&relative).is_none());
    }

    #[test]
    fn test_join_stays_under_base(leaf in "[a-z0-9]{1,12}") {
        let joined = join("/data", &leaf);
        let (parent, name) = split_parent(&joined);
        prop_assert_eq!(parent, "/data");
        prop_assert_eq!(name, leaf.as_str());
    }

    #[test]
    fn test_cache_task_name_deterministic(
        action in any_action(),
        node in "[a-z][a-z0-9-]{0,15}",
        path in any_absolute_path(),
    ) {
        let cleaned = clean_absolute(&path).unwrap();
        let opts = cache_opts(&node, &cleaned);
        let a = task_name(action, &opts, &cleaned, "helper-pod", 128);
        let b = task_name(action, &opts.clone(), &cleaned, "helper-pod", 128);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_cache_task_name_sensitive_to_inputs(
        node in "[a-z]{1,8}",
        other_node in "[a-z]{1,8}",
        leaf in "[a-z]{1,8}",
        other_leaf in "[a-z]{1,8}",
    ) {
        let path = format!("/data/{}", leaf);
        let opts = cache_opts(&node, &path);
        let base = task_name(WorkerAction::Create, &opts, &path, "helper-pod", 128);

        prop_assert_ne!(
            &base,
            &task_name(WorkerAction::Delete, &opts, &path, "helper-pod", 128)
        );
        if other_node != node {
            let moved = cache_opts(&other_node, &path);
            prop_assert_ne!(
                &base,
                &task_name(WorkerAction::Create, &moved, &path, "helper-pod", 128)
            );
        }
        if other_leaf != leaf {
            let other_path = format!("/data/{}", other_leaf);
            let other = cache_opts(&node, &other_path);
            prop_assert_ne!(
                &base,
                &task_name(WorkerAction::Create, &other, &other_path, "helper-pod", 128)
            );
        }
    }

    #[test]
    fn test_task_name_never_exceeds_cap(name in "[a-z0-9-]{1,300}", cap in 8usize..200) {
        let opts = VolumeOptions {
            name,
            model_cache: None,
            ..cache_opts("node1", "/data/x")
        };
        let task = task_name(WorkerAction::Create, &opts, "/data/x", "helper-pod", cap);
        prop_assert!(task.chars().count() <= cap);
    }
}
