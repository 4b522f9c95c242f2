use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use erpguard_auth::{
    Action, ActionFlags, DocType, Document, NewFieldPermissionLevel, NewPermissionRule,
    PermissionLevel, RequestContext, Role, RoleCode, authorize,
};
use erpguard_core::{RoleId, UserId};
use erpguard_infra::cache::PermissionCache;
use erpguard_infra::config::CacheConfig;
use erpguard_infra::evaluator::PermissionEvaluator;
use erpguard_infra::repository::CachedPermissionRepository;
use erpguard_infra::store::{InMemoryPermissionStore, PermissionStore};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

const ROLES: i64 = 8;
const FIELDS: usize = 40;

/// One user holding `ROLES` roles, only the last of which grants read.
fn setup(rt: &Runtime) -> PermissionEvaluator {
    rt.block_on(async {
        let store = InMemoryPermissionStore::new();
        store.register_user(UserId::new(1)).unwrap();
        store
            .create_doc_type(DocType::new("Invoice", "accounting"))
            .await
            .unwrap();

        for id in 1..=ROLES {
            store
                .insert_role(Role {
                    id: RoleId::new(id),
                    code: RoleCode::new(format!("role_{id}")),
                    name: format!("Role {id}"),
                    is_system: false,
                    enabled: true,
                    sort_order: id as i32,
                })
                .unwrap();
            store
                .assign_user_role(UserId::new(1), RoleId::new(id))
                .await
                .unwrap();
        }

        store
            .create_rule(NewPermissionRule {
                role_id: RoleId::new(ROLES),
                doc_type: "Invoice".into(),
                permission_level: PermissionLevel::DOCUMENT,
                permissions: ActionFlags::default().with(&[Action::Read]),
                only_if_creator: false,
                condition: None,
            })
            .await
            .unwrap();

        for i in 0..FIELDS {
            store
                .create_field_level(NewFieldPermissionLevel {
                    doc_type: "Invoice".into(),
                    field_name: format!("field_{i}"),
                    permission_level: PermissionLevel::new((i % 10) as i64).unwrap(),
                    field_type: "Data".into(),
                })
                .await
                .unwrap();
        }

        let cache = Arc::new(PermissionCache::new(&CacheConfig::default()));
        let repo = CachedPermissionRepository::new(Arc::new(store), cache);
        PermissionEvaluator::new(Arc::new(repo))
    })
}

fn invoice(i: usize) -> Document {
    let mut doc = Document::new();
    doc.insert("name".into(), json!(format!("INV-{i}")));
    for f in 0..FIELDS {
        doc.insert(format!("field_{f}"), json!(f));
    }
    doc
}

fn bench_check_permission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let evaluator = setup(&rt);
    let ctx = RequestContext::background();
    let user = UserId::new(1);

    // Warm every cache key the check touches.
    rt.block_on(async {
        evaluator
            .check_permission(&ctx, user, "Invoice", Action::Read, PermissionLevel::DOCUMENT)
            .await
            .unwrap();
    });

    let mut group = c.benchmark_group("check_permission");
    group.bench_function("warm_cache_grant", |b| {
        b.to_async(&rt).iter(|| async {
            let allowed = evaluator
                .check_permission(&ctx, user, "Invoice", Action::Read, PermissionLevel::DOCUMENT)
                .await
                .unwrap();
            black_box(allowed)
        })
    });
    group.bench_function("warm_cache_deny", |b| {
        b.to_async(&rt).iter(|| async {
            let allowed = evaluator
                .check_permission(&ctx, user, "Invoice", Action::Delete, PermissionLevel::DOCUMENT)
                .await
                .unwrap();
            black_box(allowed)
        })
    });
    group.finish();
}

fn bench_field_redaction(c: &mut Criterion) {
    let levels: BTreeMap<String, PermissionLevel> = (0..FIELDS)
        .map(|i| (format!("field_{i}"), PermissionLevel::new((i % 10) as i64).unwrap()))
        .collect();
    let user_level = PermissionLevel::new(4).unwrap();

    let mut group = c.benchmark_group("field_redaction");
    for batch in [1usize, 100, 1000] {
        let docs: Vec<Document> = (0..batch).map(invoice).collect();
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &docs, |b, docs| {
            b.iter(|| {
                let mut out = docs.clone();
                for doc in &mut out {
                    authorize::redact_document(doc, &levels, user_level);
                }
                black_box(out)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_check_permission, bench_field_redaction);
criterion_main!(benches);
