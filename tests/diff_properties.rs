//! Property tests for index diffing and server convergence.

mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;
use sqlproxy_operator::adapters::memory::MemoryEnvironment;
use sqlproxy_operator::domain::models::{ProxySpec, ReconcileContext, ServerSpec};
use sqlproxy_operator::domain::ports::ProxyClientFactory;
use sqlproxy_operator::services::Convergence;
use sqlproxy_operator::{diff, Index, ProxyResource};

fn key_set() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-e][0-3]", 0..12)
}

fn index(keys: &BTreeSet<String>) -> Index<String> {
    Index::new(keys.iter().cloned(), String::clone)
}

fn as_set(keys: &[String]) -> BTreeSet<String> {
    keys.iter().cloned().collect()
}

proptest! {
    /// Added and deleted never overlap, and rest is the intersection.
    #[test]
    fn proptest_diff_partitions_keys(current in key_set(), previous in key_set()) {
        let result = diff(&index(&current), &index(&previous));
        let added = as_set(&result.added);
        let deleted = as_set(&result.deleted);
        let rest = as_set(&result.rest);

        prop_assert!(added.is_disjoint(&deleted));
        prop_assert!(added.is_disjoint(&rest));
        prop_assert!(deleted.is_disjoint(&rest));

        let current_side: BTreeSet<_> = added.union(&rest).cloned().collect();
        let previous_side: BTreeSet<_> = deleted.union(&rest).cloned().collect();
        prop_assert_eq!(current_side, current.clone());
        prop_assert_eq!(previous_side, previous.clone());

        let both: BTreeSet<_> = current.intersection(&previous).cloned().collect();
        prop_assert_eq!(rest, both);
    }

    /// Every output list comes back sorted without duplicates.
    #[test]
    fn proptest_diff_output_is_sorted(current in key_set(), previous in key_set()) {
        let result = diff(&index(&current), &index(&previous));
        for list in [&result.added, &result.deleted, &result.rest] {
            prop_assert!(list.windows(2).all(|w| w[0] < w[1]), "{:?}", list);
        }
    }

    /// Diffing an index against itself is converged.
    #[test]
    fn proptest_self_diff_is_converged(keys in key_set()) {
        let result = diff(&index(&keys), &index(&keys));
        prop_assert!(result.is_converged());
        prop_assert_eq!(as_set(&result.rest), keys);
    }

    /// Whatever servers a pod starts with, one pass leaves exactly the
    /// declared ones and a second pass has nothing to add or delete.
    #[test]
    fn proptest_server_convergence_reaches_declared_set(
        declared in key_set(),
        observed in key_set(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let env = MemoryEnvironment::new();
            let spec = ProxySpec {
                replicas: 1,
                servers: declared
                    .iter()
                    .map(|id| ServerSpec::new(id.as_str(), format!("{id}.db")))
                    .collect(),
                ..ProxySpec::default()
            };
            let proxy = ProxyResource::new(common::NAMESPACE, "proxy", spec);
            let pod = env.proxies.pod(&proxy.pod_name(0));
            for id in &observed {
                pod.insert_server(id, "Running");
            }

            let ctx = ReconcileContext::default();
            let client = env.proxies.client_for_pod(&ctx, &proxy, 0).await.unwrap();
            let conv = Convergence::new(&ctx, &proxy, client.as_ref(), env.platform.as_ref());

            let first = conv.servers().await.unwrap();
            assert_eq!(as_set(&first.added), &declared - &observed);
            assert_eq!(as_set(&first.deleted), &observed - &declared);
            assert_eq!(pod.server_ids(), declared.iter().cloned().collect::<Vec<_>>());

            pod.clear_calls();
            let second = conv.servers().await.unwrap();
            assert!(second.is_converged());
            assert_eq!(as_set(&second.rest), declared);
            assert!(pod
                .calls()
                .iter()
                .all(|c| c == "servers.list"
                    || c.starts_with("servers.patch ")
                    || c.starts_with("servers.set_state ")));
        });
    }
}
