use actor_migration::core::stage::{READ_NEW, READ_OLD, WRITE_NEW, WRITE_OLD};
use actor_migration::core::trace::MemorySink;
use actor_migration::{
    ActorId, ActorNormalization, ActorStoreFactory, EngineOptions, FieldSpec, MigrationError,
    MigrationStage, SchemaMigrationEngine, SqlValue, StorageHandle, TempTableSpec, UserIdentity,
    UserSelection, WhereAlternative,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MapActors {
    ids: Mutex<HashMap<String, ActorId>>,
}

impl MapActors {
    fn seed(&self, name: &str, id: i64) {
        self.ids.lock().unwrap().insert(name.to_string(), ActorId(id));
    }
}

impl ActorNormalization for MapActors {
    fn find_actor_id(
        &self,
        user: &UserIdentity,
        _db: &dyn StorageHandle,
    ) -> Result<Option<ActorId>, MigrationError> {
        Ok(self.ids.lock().unwrap().get(&user.name).copied())
    }

    fn acquire_actor_id(
        &self,
        user: &UserIdentity,
        _db: &dyn StorageHandle,
    ) -> Result<ActorId, MigrationError> {
        let mut ids = self.ids.lock().unwrap();
        let next = ActorId(100 + ids.len() as i64);
        Ok(*ids.entry(user.name.clone()).or_insert(next))
    }
}

struct MapFactory(Arc<MapActors>);

impl ActorStoreFactory for MapFactory {
    fn actor_normalization(
        &self,
        domain_id: &str,
    ) -> Result<Arc<dyn ActorNormalization>, MigrationError> {
        if domain_id != "testwiki" {
            return Err(MigrationError::NotFound(domain_id.to_string()));
        }
        Ok(self.0.clone())
    }
}

type Upsert = (String, String, Vec<(String, SqlValue)>);

#[derive(Default)]
struct RecordingDb {
    upserts: RefCell<Vec<Upsert>>,
}

impl StorageHandle for RecordingDb {
    fn domain_id(&self) -> &str {
        "testwiki"
    }

    fn upsert(
        &self,
        table: &str,
        unique_key: &str,
        row: &[(String, SqlValue)],
        _set: &[(String, SqlValue)],
    ) -> Result<(), MigrationError> {
        self.upserts
            .borrow_mut()
            .push((table.to_string(), unique_key.to_string(), row.to_vec()));
        Ok(())
    }
}

fn specs() -> BTreeMap<String, FieldSpec> {
    let mut specs = BTreeMap::new();
    specs.insert("rev_user".to_string(), FieldSpec::default());
    let mut extra = BTreeMap::new();
    extra.insert("ar_timestamp".to_string(), "ar_timestamp".to_string());
    specs.insert(
        "ar_user".to_string(),
        FieldSpec {
            temp_table: Some(TempTableSpec {
                table: "archive_actor_temp".to_string(),
                pk: "aractor_id".to_string(),
                field: "aractor_actor".to_string(),
                join_pk: "ar_id".to_string(),
                extra,
            }),
            ..FieldSpec::default()
        },
    );
    specs.insert(
        "ipb_by".to_string(),
        FieldSpec {
            text_field: Some("ipb_by_text".to_string()),
            actor_field: Some("ipb_by_actor".to_string()),
            former_temp_table: Some("1.35".to_string()),
            ..FieldSpec::default()
        },
    );
    specs.insert(
        "img_user".to_string(),
        FieldSpec {
            deprecated_version: Some("1.37".to_string()),
            component: Some("FileRepo".to_string()),
            ..FieldSpec::default()
        },
    );
    specs.insert(
        "log_user".to_string(),
        FieldSpec {
            removed_version: Some("1.40".to_string()),
            ..FieldSpec::default()
        },
    );
    specs
}

struct Fixture {
    engine: SchemaMigrationEngine,
    actors: Arc<MapActors>,
    sink: Arc<MemorySink>,
    db: RecordingDb,
}

fn fixture(stage: MigrationStage) -> Fixture {
    let actors = Arc::new(MapActors::default());
    let sink = Arc::new(MemorySink::new());
    let engine = SchemaMigrationEngine::new(
        specs(),
        stage,
        Arc::new(MapFactory(actors.clone())),
        EngineOptions {
            sink: sink.clone(),
            ..EngineOptions::default()
        },
    )
    .expect("engine");
    Fixture {
        engine,
        actors,
        sink,
        db: RecordingDb::default(),
    }
}

fn all_stages() -> [MigrationStage; 4] {
    [
        MigrationStage::OLD,
        MigrationStage::WRITE_BOTH_READ_OLD,
        MigrationStage::WRITE_BOTH_READ_NEW,
        MigrationStage::NEW,
    ]
}

#[test]
fn construction_validates_stage_bits() {
    let factory: Arc<dyn ActorStoreFactory> = Arc::new(MapFactory(Arc::default()));
    for bits in [
        WRITE_OLD | READ_OLD,
        WRITE_OLD | WRITE_NEW | READ_OLD,
        WRITE_OLD | WRITE_NEW | READ_NEW,
        WRITE_NEW | READ_NEW,
    ] {
        assert!(
            SchemaMigrationEngine::from_bits(specs(), bits, factory.clone(), EngineOptions::default())
                .is_ok(),
            "bits {bits:#x} should be accepted"
        );
    }
    for bits in [
        0,
        READ_OLD,
        WRITE_OLD,
        WRITE_OLD | WRITE_NEW | READ_OLD | READ_NEW,
        WRITE_NEW | READ_OLD,
        WRITE_OLD | READ_NEW,
    ] {
        let res =
            SchemaMigrationEngine::from_bits(specs(), bits, factory.clone(), EngineOptions::default());
        assert!(
            matches!(res, Err(MigrationError::ConfigurationError(_))),
            "bits {bits:#x} should be rejected"
        );
    }
}

#[test]
fn join_is_deterministic_and_cached() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_NEW);
    let first = fx.engine.build_join("rev_user").unwrap();
    let second = fx.engine.build_join("rev_user").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fx.engine.cached_joins(), 1);

    let other = fixture(MigrationStage::WRITE_BOTH_READ_NEW);
    assert_eq!(*other.engine.build_join("rev_user").unwrap(), *first);
}

#[test]
fn join_under_read_old_uses_legacy_columns() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_OLD);
    let join = fx.engine.build_join("rev_user").unwrap();
    assert!(join.tables.is_empty());
    assert_eq!(join.fields.user_id.expr, "rev_user");
    assert_eq!(join.fields.user_name.expr, "rev_user_text");
    assert_eq!(join.fields.actor.expr, "NULL");
    assert_eq!(join.fields.actor.alias, "rev_actor");
}

#[test]
fn join_under_read_new_namespaces_aliases_per_field() {
    let fx = fixture(MigrationStage::NEW);
    let rev = fx.engine.build_join("rev_user").unwrap();
    let ar = fx.engine.build_join("ar_user").unwrap();

    assert_eq!(rev.tables.len(), 1);
    assert_eq!(rev.tables[0].alias, "actor_rev_user");
    assert_eq!(rev.tables[0].on, "actor_rev_user.actor_id = rev_actor");
    assert_eq!(rev.fields.user_name.expr, "actor_rev_user.actor_name");
    assert_eq!(rev.fields.actor.expr, "rev_actor");

    let aliases: Vec<&str> = ar.tables.iter().map(|t| t.alias.as_str()).collect();
    assert_eq!(aliases, vec!["temp_ar_user", "actor_ar_user"]);
    assert_eq!(ar.tables[0].on, "temp_ar_user.aractor_id = ar_id");
    assert_eq!(ar.fields.actor.expr, "temp_ar_user.aractor_actor");

    for t in &ar.tables {
        assert!(rev.tables.iter().all(|r| r.alias != t.alias));
    }
}

#[test]
fn insert_values_dual_write() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_OLD);
    let alice = UserIdentity::new(7, "Alice");
    let values = fx.engine.build_insert_values(&fx.db, "rev_user", &alice).unwrap();

    let actor = fx.actors.find_actor_id(&alice, &fx.db).unwrap().expect("acquired");
    let mut expected = BTreeMap::new();
    expected.insert("rev_user".to_string(), SqlValue::Int(7));
    expected.insert("rev_user_text".to_string(), SqlValue::from("Alice"));
    expected.insert("rev_actor".to_string(), SqlValue::Int(actor.0));
    assert_eq!(values, expected);

    let again = fx.engine.build_insert_values(&fx.db, "rev_user", &alice).unwrap();
    assert_eq!(again, values);
}

#[test]
fn insert_values_write_canonical_names_and_reject_oversized_ids() {
    let fx = fixture(MigrationStage::OLD);
    let ip = UserIdentity::anonymous("2001:db8::1");
    let values = fx.engine.build_insert_values(&fx.db, "rev_user", &ip).unwrap();
    let written = values["rev_user_text"].clone();
    assert_eq!(written, SqlValue::from("2001:DB8:0:0:0:0:0:1"));

    let desc = fx.engine.build_where(&fx.db, "rev_user", &ip, true).unwrap();
    assert_eq!(desc.conds, format!("(rev_user_text = {})", written.to_literal()));

    let huge = UserIdentity::new(u64::MAX, "Huge");
    let err = fx.engine.build_insert_values(&fx.db, "rev_user", &huge).unwrap_err();
    assert!(err.is_usage(), "unexpected error {err}");
    let err = fx.engine.build_where(&fx.db, "rev_user", &huge, true).unwrap_err();
    assert!(err.is_usage(), "unexpected error {err}");
}

#[test]
fn insert_values_respects_write_mode() {
    let alice = UserIdentity::new(7, "Alice");

    let old = fixture(MigrationStage::OLD);
    let values = old.engine.build_insert_values(&old.db, "rev_user", &alice).unwrap();
    assert_eq!(values.len(), 2);
    assert!(!values.contains_key("rev_actor"));
    assert!(old.actors.ids.lock().unwrap().is_empty());

    let new = fixture(MigrationStage::NEW);
    let values = new.engine.build_insert_values(&new.db, "rev_user", &alice).unwrap();
    assert_eq!(values.keys().collect::<Vec<_>>(), vec!["rev_actor"]);
}

#[test]
fn insert_values_rejects_temp_table_field() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_OLD);
    let err = fx
        .engine
        .build_insert_values(&fx.db, "ar_user", &UserIdentity::new(1, "A"))
        .unwrap_err();
    assert!(err.is_usage());
    assert!(err.to_string().contains("build_insert_values_with_temp_table"));
}

#[test]
fn temp_table_write_defers_actor_to_callback() {
    let fx = fixture(MigrationStage::NEW);
    let alice = UserIdentity::new(7, "Alice");
    let (values, deferred) = fx
        .engine
        .build_insert_values_with_temp_table(&fx.db, "ar_user", &alice)
        .unwrap();
    assert!(values.is_empty());
    assert!(deferred.writes());

    let mut extras = BTreeMap::new();
    extras.insert("ar_timestamp".to_string(), SqlValue::from("20210101000000"));
    deferred.complete(&fx.db, 42i64, &extras).unwrap();

    let actor = fx.actors.find_actor_id(&alice, &fx.db).unwrap().unwrap();
    let upserts = fx.db.upserts.borrow();
    assert_eq!(upserts.len(), 1);
    let (table, key, row) = &upserts[0];
    assert_eq!(table, "archive_actor_temp");
    assert_eq!(key, "aractor_id");
    assert_eq!(
        row,
        &vec![
            ("aractor_id".to_string(), SqlValue::Int(42)),
            ("aractor_actor".to_string(), SqlValue::Int(actor.0)),
            ("ar_timestamp".to_string(), SqlValue::from("20210101000000")),
        ]
    );
}

#[test]
fn temp_table_write_old_columns_under_dual_write() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_OLD);
    let (values, deferred) = fx
        .engine
        .build_insert_values_with_temp_table(&fx.db, "ar_user", &UserIdentity::new(7, "Alice"))
        .unwrap();
    assert_eq!(values.get("ar_user"), Some(&SqlValue::Int(7)));
    assert_eq!(values.get("ar_user_text"), Some(&SqlValue::from("Alice")));
    assert!(!values.contains_key("ar_actor"));
    assert!(deferred.writes());
}

#[test]
fn temp_table_callback_missing_extra_is_usage_error() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_NEW);
    let (_, deferred) = fx
        .engine
        .build_insert_values_with_temp_table(&fx.db, "ar_user", &UserIdentity::new(7, "Alice"))
        .unwrap();
    let err = deferred.complete(&fx.db, 42i64, &BTreeMap::new()).unwrap_err();
    assert!(err.is_usage());
    assert!(fx.db.upserts.borrow().is_empty());
}

#[test]
fn temp_table_write_under_old_only_still_checks_extras() {
    let fx = fixture(MigrationStage::OLD);
    let (values, deferred) = fx
        .engine
        .build_insert_values_with_temp_table(&fx.db, "ar_user", &UserIdentity::new(7, "Alice"))
        .unwrap();
    assert_eq!(values.len(), 2);
    assert!(!deferred.writes());
    assert!(deferred.complete(&fx.db, 1i64, &BTreeMap::new()).is_err());
    assert!(fx.db.upserts.borrow().is_empty());
}

#[test]
fn temp_table_path_rejects_plain_field() {
    let fx = fixture(MigrationStage::NEW);
    let err = fx
        .engine
        .build_insert_values_with_temp_table(&fx.db, "rev_user", &UserIdentity::new(7, "Alice"))
        .unwrap_err();
    assert!(err.is_usage());
    assert!(err.to_string().contains("build_insert_values()"));
}

#[test]
fn former_temp_table_field_is_deprecated_not_rejected() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_NEW);
    let (values, deferred) = fx
        .engine
        .build_insert_values_with_temp_table(&fx.db, "ipb_by", &UserIdentity::new(3, "Carol"))
        .unwrap();
    assert!(values.contains_key("ipb_by_actor"));
    assert!(values.contains_key("ipb_by_text"));
    assert!(!deferred.writes());
    deferred.complete(&fx.db, 5i64, &BTreeMap::new()).unwrap();

    let notices = fx.sink.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].version, "1.35");
    assert!(notices[0].subject.contains("ipb_by"));
}

#[test]
fn removed_field_fails_every_operation_in_every_stage() {
    for stage in all_stages() {
        let fx = fixture(stage);
        let user = UserIdentity::new(1, "A");
        let results = [
            fx.engine.build_join("log_user").map(|_| ()),
            fx.engine.build_insert_values(&fx.db, "log_user", &user).map(|_| ()),
            fx.engine
                .build_insert_values_with_temp_table(&fx.db, "log_user", &user)
                .map(|_| ()),
            fx.engine.build_where(&fx.db, "log_user", &user, true).map(|_| ()),
        ];
        for res in results {
            match res {
                Err(MigrationError::FieldRemoved {
                    key,
                    version,
                    component,
                }) => {
                    assert_eq!(key, "log_user");
                    assert_eq!(version, "1.40");
                    assert_eq!(component, "core");
                }
                other => panic!("stage {stage}: expected removal error, got {other:?}"),
            }
        }
    }
}

#[test]
fn deprecated_field_emits_notice_and_proceeds() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_OLD);
    let join = fx.engine.build_join("img_user").unwrap();
    assert_eq!(join.fields.user_id.expr, "img_user");
    fx.engine.build_join("img_user").unwrap();

    let notices = fx.sink.notices();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0].component, "FileRepo");
    assert_eq!(notices[0].version, "1.37");
    assert!(notices[0].message().contains("img_user"));
}

#[test]
fn unknown_fields_follow_allow_unknown() {
    let fx = fixture(MigrationStage::OLD);
    let join = fx.engine.build_join("rc_user").unwrap();
    assert_eq!(join.fields.user_name.expr, "rc_user_text");

    let strict = SchemaMigrationEngine::new(
        specs(),
        MigrationStage::OLD,
        Arc::new(MapFactory(Arc::default())),
        EngineOptions {
            allow_unknown: false,
            ..EngineOptions::default()
        },
    )
    .unwrap();
    assert!(strict.build_join("rc_user").unwrap_err().is_usage());
    assert!(strict.build_join("rev_user").is_ok());
}

#[test]
fn where_with_no_users_matches_nothing() {
    for stage in all_stages() {
        let fx = fixture(stage);
        for users in [UserSelection::None, UserSelection::Many(&[])] {
            let desc = fx.engine.build_where(&fx.db, "rev_user", users, true).unwrap();
            assert_eq!(desc.conds, "1=0");
            assert!(desc.alternatives.is_empty());
            assert!(desc.tables.is_empty());
            assert!(desc.matches_nothing());
        }
    }
}

#[test]
fn where_read_old_splits_ids_and_names() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_OLD);
    let users = vec![
        UserIdentity::new(7, "Alice"),
        UserIdentity::new(8, "Bob"),
        UserIdentity::anonymous("010.000.000.001"),
    ];
    let desc = fx.engine.build_where(&fx.db, "rev_user", &users, true).unwrap();
    assert_eq!(
        desc.alternatives[&WhereAlternative::UserId],
        "rev_user IN (7,8)"
    );
    assert_eq!(
        desc.alternatives[&WhereAlternative::UserName],
        "rev_user_text = '10.0.0.1'"
    );
    assert_eq!(
        desc.conds,
        "(rev_user IN (7,8)) OR (rev_user_text = '10.0.0.1')"
    );
    assert!(desc.tables.is_empty());
}

#[test]
fn where_read_old_without_id_match_never_uses_ids() {
    let fx = fixture(MigrationStage::OLD);
    let users = vec![UserIdentity::new(7, "Alice"), UserIdentity::new(8, "O'Hara")];
    let desc = fx.engine.build_where(&fx.db, "rev_user", &users, false).unwrap();
    assert!(!desc.alternatives.contains_key(&WhereAlternative::UserId));
    assert_eq!(desc.conds, "(rev_user_text IN ('Alice','O''Hara'))");
}

#[test]
fn where_read_new_matches_known_actors_only() {
    let fx = fixture(MigrationStage::WRITE_BOTH_READ_NEW);
    fx.actors.seed("Alice", 11);
    fx.actors.seed("127.0.0.1", 12);

    let users = [
        UserIdentity::new(7, "Alice"),
        UserIdentity::new(9, "Nobody"),
        UserIdentity::anonymous("127.0.0.1"),
    ];
    let desc = fx.engine.build_where(&fx.db, "rev_user", &users, true).unwrap();
    assert_eq!(desc.alternatives.len(), 1);
    assert_eq!(desc.alternatives[&WhereAlternative::NewActor], "rev_actor IN (11,12)");
    assert_eq!(desc.conds, "(rev_actor IN (11,12))");
    assert!(desc.tables.is_empty());

    let nobody = UserIdentity::new(9, "Nobody");
    let desc = fx.engine.build_where(&fx.db, "rev_user", &nobody, true).unwrap();
    assert_eq!(desc.conds, "1=0");
}

#[test]
fn where_read_new_joins_temp_table() {
    let fx = fixture(MigrationStage::NEW);
    fx.actors.seed("Alice", 11);
    let alice = UserIdentity::new(7, "Alice");
    let desc = fx.engine.build_where(&fx.db, "ar_user", &alice, true).unwrap();
    assert_eq!(desc.tables.len(), 1);
    assert_eq!(desc.tables[0].alias, "temp_ar_user");
    assert_eq!(
        desc.join_clause(),
        "JOIN archive_actor_temp temp_ar_user ON (temp_ar_user.aractor_id = ar_id)"
    );
    assert_eq!(desc.conds, "(temp_ar_user.aractor_actor = 11)");
}

#[test]
fn where_needs_actor_store_for_domain() {
    let fx = fixture(MigrationStage::NEW);

    struct OtherDb;
    impl StorageHandle for OtherDb {
        fn domain_id(&self) -> &str {
            "otherwiki"
        }
        fn upsert(
            &self,
            _: &str,
            _: &str,
            _: &[(String, SqlValue)],
            _: &[(String, SqlValue)],
        ) -> Result<(), MigrationError> {
            Ok(())
        }
    }

    let alice = UserIdentity::new(7, "Alice");
    let res = fx.engine.build_where(&OtherDb, "rev_user", &alice, true);
    assert!(matches!(res, Err(MigrationError::NotFound(_))));
}

#[test]
fn anon_predicates_follow_read_mode() {
    let old = fixture(MigrationStage::WRITE_BOTH_READ_OLD);
    assert_eq!(old.engine.is_anon("rev_user"), "rev_user = 0");
    assert_eq!(old.engine.is_not_anon("rev_user"), "rev_user != 0");

    let new = fixture(MigrationStage::WRITE_BOTH_READ_NEW);
    let join = new.engine.build_join("rev_user").unwrap();
    assert_eq!(
        new.engine.is_anon(&join.fields.user_id.expr),
        "actor_rev_user.actor_user IS NULL"
    );
    assert_eq!(
        new.engine.is_not_anon(&join.fields.user_id.expr),
        "actor_rev_user.actor_user IS NOT NULL"
    );
}
