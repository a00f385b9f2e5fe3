//! End-to-end scenarios against a mock executor.
//!
//! The executor echoes every compiled request into a shared log so tests
//! assert on the exact wire shapes a chain produces, without any store.

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use theorydb::{
    Av, BatchGetOptions, CompiledQuery, DataKeyProvider, Envelope, Executor, ExecutorError, Item,
    Model, ModelSchema, Operation, QueryOutput, Registry, ReturnValues, TheoryDb, TheoryError,
    TransactItem, WriteRequest, decode_cursor, encode_cursor,
};
use theorydb::{BatchGetOutput, BatchWriteResult};

// ---------------------------------------------------------------------------
// Mock executor
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockInner {
    queries: Vec<CompiledQuery>,
    scans: Vec<CompiledQuery>,
    get_items: Vec<(CompiledQuery, Item)>,
    put_items: Vec<(CompiledQuery, Item)>,
    update_items: Vec<(CompiledQuery, Item)>,
    delete_items: Vec<(CompiledQuery, Item)>,
    batch_get_calls: Vec<Vec<Item>>,
    transactions: Vec<Vec<TransactItem>>,

    query_output: QueryOutput,
    get_output: Option<Item>,
    update_output: Option<Item>,
    transact_reasons: Option<Vec<Option<String>>>,
}

#[derive(Default)]
struct MockExecutor {
    inner: Mutex<MockInner>,
}

impl MockExecutor {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap()
    }
}

impl Executor for MockExecutor {
    fn execute_query(&self, query: &CompiledQuery) -> Result<QueryOutput, ExecutorError> {
        let mut inner = self.lock();
        inner.queries.push(query.clone());
        Ok(inner.query_output.clone())
    }

    fn execute_scan(&self, query: &CompiledQuery) -> Result<QueryOutput, ExecutorError> {
        let mut inner = self.lock();
        inner.scans.push(query.clone());
        Ok(inner.query_output.clone())
    }

    fn execute_get_item(
        &self,
        query: &CompiledQuery,
        key: &Item,
    ) -> Result<Option<Item>, ExecutorError> {
        let mut inner = self.lock();
        inner.get_items.push((query.clone(), key.clone()));
        Ok(inner.get_output.clone())
    }

    fn execute_put_item(&self, query: &CompiledQuery, item: &Item) -> Result<(), ExecutorError> {
        self.lock().put_items.push((query.clone(), item.clone()));
        Ok(())
    }

    fn execute_update_item(
        &self,
        query: &CompiledQuery,
        key: &Item,
    ) -> Result<Option<Item>, ExecutorError> {
        let mut inner = self.lock();
        inner.update_items.push((query.clone(), key.clone()));
        Ok(inner.update_output.clone())
    }

    fn execute_delete_item(&self, query: &CompiledQuery, key: &Item) -> Result<(), ExecutorError> {
        self.lock().delete_items.push((query.clone(), key.clone()));
        Ok(())
    }

    fn execute_batch_get(
        &self,
        _table: &str,
        keys: &[Item],
        _consistent: bool,
    ) -> Result<BatchGetOutput, ExecutorError> {
        self.lock().batch_get_calls.push(keys.to_vec());
        // Echo each key back as a full item.
        Ok(BatchGetOutput {
            items: keys.to_vec(),
            unprocessed_keys: Vec::new(),
        })
    }

    fn execute_batch_write(
        &self,
        _table: &str,
        _requests: &[WriteRequest],
    ) -> Result<BatchWriteResult, ExecutorError> {
        Ok(BatchWriteResult::default())
    }

    fn transact_write(&self, items: &[TransactItem]) -> Result<(), ExecutorError> {
        let mut inner = self.lock();
        inner.transactions.push(items.to_vec());
        match inner.transact_reasons.take() {
            Some(reasons) => Err(ExecutorError::TransactionCanceled { reasons }),
            None => Ok(()),
        }
    }
}

fn fresh_db() -> (Arc<MockExecutor>, TheoryDb) {
    let exec = Arc::new(MockExecutor::default());
    let db = TheoryDb::builder(exec.clone())
        .registry(Arc::new(Registry::new()))
        .build();
    (exec, db)
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct User {
    #[serde(default)]
    pk: String,
    #[serde(default)]
    sk: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    scores: Vec<i64>,
    #[serde(default)]
    secret: Option<String>,
}

impl Model for User {
    fn schema() -> ModelSchema {
        ModelSchema::new("users")
            .field("pk", "pk")
            .field("sk", "sk")
            .field("status", "status")
            .field("tags", "tags")
            .field("scores", "scores")
            .field("secret", "secret,encrypted,omitempty")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Setting {
    #[serde(default)]
    pk: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    version: i64,
}

impl Model for Setting {
    fn schema() -> ModelSchema {
        ModelSchema::new("settings")
            .field("pk", "pk")
            .field("title", "title")
            .field("version", "version")
    }
}

fn user(pk: &str, sk: &str) -> User {
    User {
        pk: pk.into(),
        sk: sk.into(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// S1: simple query with a reserved word
// ---------------------------------------------------------------------------

#[test]
fn s1_query_with_reserved_word_filter() {
    let (exec, db) = fresh_db();

    let found: Vec<User> = db
        .model(User::default())
        .where_("pk", "=", "user#42")
        .filter("status", "=", "active")
        .limit(10)
        .all()
        .unwrap();
    assert!(found.is_empty());

    let inner = exec.lock();
    assert_eq!(inner.queries.len(), 1);
    let q = &inner.queries[0];
    assert_eq!(q.operation, Some(Operation::Query));
    assert_eq!(q.table_name, "users");
    assert_eq!(q.key_condition_expression.as_deref(), Some("#n1 = :v1"));
    assert_eq!(q.filter_expression.as_deref(), Some("#STATUS = :v2"));
    assert_eq!(q.expression_attribute_names["#n1"], "pk");
    assert_eq!(q.expression_attribute_names["#STATUS"], "status");
    assert_eq!(q.expression_attribute_values[":v1"], Av::s("user#42"));
    assert_eq!(q.expression_attribute_values[":v2"], Av::s("active"));
    assert_eq!(q.limit, Some(10));
    // Nothing user-supplied appears as bare text.
    let text = q.key_condition_expression.as_deref().unwrap();
    assert!(!text.contains("user#42") && !text.contains("pk"));
}

#[test]
fn where_on_non_key_field_is_rejected() {
    let (exec, db) = fresh_db();
    let err = db
        .model(User::default())
        .where_("status", "=", "active")
        .all()
        .unwrap_err();
    assert!(err.is_invalid_value());
    assert!(exec.lock().queries.is_empty());
}

#[test]
fn unknown_index_is_rejected() {
    let (_exec, db) = fresh_db();
    let err = db
        .model(User::default())
        .index("gsi-missing")
        .where_("pk", "=", "x")
        .all()
        .unwrap_err();
    assert!(matches!(err, TheoryError::IndexNotFound(name) if name == "gsi-missing"));
}

// ---------------------------------------------------------------------------
// S2: optimistic update with a version field
// ---------------------------------------------------------------------------

#[test]
fn s2_update_appends_version_pair() {
    let (exec, db) = fresh_db();

    let record = Setting {
        pk: "org#1#key#k".into(),
        title: "new".into(),
        version: 7,
    };
    db.model(record).update(&["title"]).unwrap();

    let inner = exec.lock();
    let (q, key) = &inner.update_items[0];
    assert_eq!(q.operation, Some(Operation::UpdateItem));
    assert_eq!(q.update_expression.as_deref(), Some("SET #n1 = :v1, #n2 = :v2"));
    assert_eq!(q.condition_expression.as_deref(), Some("#n2 = :v3"));
    assert_eq!(q.expression_attribute_names["#n1"], "title");
    assert_eq!(q.expression_attribute_names["#n2"], "version");
    assert_eq!(q.expression_attribute_values[":v1"], Av::s("new"));
    assert_eq!(q.expression_attribute_values[":v2"], Av::N("8".into()));
    assert_eq!(q.expression_attribute_values[":v3"], Av::N("7".into()));
    assert_eq!(q.return_values, Some(ReturnValues::None));
    assert_eq!(key["pk"], Av::s("org#1#key#k"));
}

#[test]
fn s2_update_returning_consumes_all_new() {
    let (exec, db) = fresh_db();
    {
        let mut inner = exec.lock();
        inner.update_output = Some(Item::from([
            ("pk".to_string(), Av::s("org#1#key#k")),
            ("title".to_string(), Av::s("new")),
            ("version".to_string(), Av::n(8)),
        ]));
    }

    let record = Setting {
        pk: "org#1#key#k".into(),
        title: "new".into(),
        version: 7,
    };
    let stored = db.model(record).update_returning(&["title"]).unwrap();
    assert_eq!(stored.version, 8);
    assert_eq!(
        exec.lock().update_items[0].0.return_values,
        Some(ReturnValues::AllNew)
    );
}

#[test]
fn update_of_automatic_fields_is_rejected() {
    let (_exec, db) = fresh_db();
    let record = Setting {
        pk: "p".into(),
        ..Default::default()
    };
    let err = db.model(record).update(&["version"]).unwrap_err();
    assert!(err.is_invalid_value());
}

// ---------------------------------------------------------------------------
// S3: nested list mutation through the update builder
// ---------------------------------------------------------------------------

#[test]
fn s3_list_mutations_compile_to_indexed_paths() {
    let (exec, db) = fresh_db();

    db.update_builder(user("u#1", "profile"))
        .set_list_element("tags", 2, "vip")
        .remove_from_list_at("scores", 0)
        .execute()
        .unwrap();

    let inner = exec.lock();
    let (q, key) = &inner.update_items[0];
    assert_eq!(
        q.update_expression.as_deref(),
        Some("SET #n1[2] = :v1 REMOVE #n2[0]")
    );
    assert_eq!(q.expression_attribute_names["#n1"], "tags");
    assert_eq!(q.expression_attribute_names["#n2"], "scores");
    assert_eq!(q.expression_attribute_values[":v1"], Av::s("vip"));
    assert_eq!(key["pk"], Av::s("u#1"));
    assert_eq!(key["sk"], Av::s("profile"));
}

#[test]
fn s3_negative_index_fails_at_execute() {
    let (exec, db) = fresh_db();

    let err = db
        .update_builder(user("u#1", "profile"))
        .set_list_element("tags", -1, "vip")
        .execute()
        .unwrap_err();
    assert!(err.is_security());
    assert!(exec.lock().update_items.is_empty());
}

// ---------------------------------------------------------------------------
// S4: cursor round-trip
// ---------------------------------------------------------------------------

#[test]
fn s4_cursor_roundtrip_and_corruption() {
    let key = Item::from([
        ("pk".to_string(), Av::s("org#1")),
        ("sk".to_string(), Av::s("key#z")),
    ]);
    let token = encode_cursor(&key).unwrap();
    assert_eq!(decode_cursor(&token).unwrap(), key);

    let mut corrupted = token.clone();
    let replacement = if corrupted.ends_with('Q') { 'X' } else { 'Q' };
    corrupted.pop();
    corrupted.push(replacement);
    assert!(decode_cursor(&corrupted).unwrap_err().is_invalid_value());
}

#[test]
fn s4_cursor_feeds_exclusive_start_key_and_back() {
    let (exec, db) = fresh_db();
    let key = Item::from([
        ("pk".to_string(), Av::s("org#1")),
        ("sk".to_string(), Av::s("key#z")),
    ]);
    exec.lock().query_output = QueryOutput {
        items: Vec::new(),
        last_evaluated_key: Some(key.clone()),
        count: 0,
    };

    let token = encode_cursor(&key).unwrap();
    let (items, next) = db
        .model(User::default())
        .where_("pk", "=", "org#1")
        .cursor(&token)
        .all_with_cursor()
        .unwrap();
    assert!(items.is_empty());

    let inner = exec.lock();
    assert_eq!(inner.queries[0].exclusive_start_key, Some(key.clone()));
    // The continuation token decodes back to the echoed key.
    assert_eq!(decode_cursor(&next.unwrap()).unwrap(), key);
}

// ---------------------------------------------------------------------------
// S5: batch get chunking
// ---------------------------------------------------------------------------

#[test]
fn s5_batch_get_partitions_without_duplication() {
    let (exec, db) = fresh_db();

    let keys: Vec<Item> = (0..60)
        .map(|i| {
            Item::from([
                ("pk".to_string(), Av::s(format!("user#{i}"))),
                ("sk".to_string(), Av::s("profile")),
            ])
        })
        .collect();

    let progress_log = Arc::new(Mutex::new(Vec::new()));
    let log = progress_log.clone();
    let fetched: Vec<User> = db
        .batch_get(
            &keys,
            BatchGetOptions {
                progress: Some(Box::new(move |count| log.lock().unwrap().push(count))),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(fetched.len(), 60);

    let inner = exec.lock();
    let sizes: Vec<usize> = inner.batch_get_calls.iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![25, 25, 10]);

    // No key appears in more than one chunk.
    let mut seen = std::collections::HashSet::new();
    for chunk in &inner.batch_get_calls {
        for key in chunk {
            let tag = key["pk"].as_s().unwrap().to_string();
            assert!(seen.insert(tag), "duplicated key across chunks");
        }
    }

    // Progress is invoked per chunk with nondecreasing counts.
    let progress = progress_log.lock().unwrap();
    assert_eq!(progress.as_slice(), &[25, 50, 60]);
}

#[test]
fn batch_get_deduplicates_input_keys() {
    let (exec, db) = fresh_db();
    let key = Item::from([
        ("pk".to_string(), Av::s("user#1")),
        ("sk".to_string(), Av::s("profile")),
    ]);
    let fetched: Vec<User> = db
        .batch_get(&[key.clone(), key.clone(), key], BatchGetOptions::default())
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(exec.lock().batch_get_calls[0].len(), 1);
}

// ---------------------------------------------------------------------------
// S6: encrypted fields fail closed
// ---------------------------------------------------------------------------

struct XorKms;

impl DataKeyProvider for XorKms {
    fn seal(&self, plaintext: &[u8]) -> Result<Envelope, theorydb::ConvertError> {
        Ok(Envelope {
            version: 1,
            encrypted_data_key: vec![1],
            nonce: vec![2],
            ciphertext: plaintext.iter().map(|b| b ^ 0x5A).collect(),
        })
    }

    fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, theorydb::ConvertError> {
        Ok(envelope.ciphertext.iter().map(|b| b ^ 0x5A).collect())
    }
}

fn envelope_item() -> Item {
    let envelope = Envelope {
        version: 1,
        encrypted_data_key: vec![1],
        nonce: vec![2],
        ciphertext: vec![3, 4],
    };
    Item::from([
        ("pk".to_string(), Av::s("u#1")),
        ("sk".to_string(), Av::s("profile")),
        ("secret".to_string(), envelope.to_av()),
    ])
}

#[test]
fn s6_unmarshal_envelope_without_provider_fails_closed() {
    let (_exec, db) = fresh_db();
    let err = db.from_item::<User>(&envelope_item()).unwrap_err();
    assert!(err.is_encryption_not_configured());
}

#[test]
fn s6_filter_on_encrypted_field_rejected_before_dispatch() {
    let (exec, db) = fresh_db();
    let err = db
        .model(User::default())
        .where_("pk", "=", "u#1")
        .filter("secret", "=", "x")
        .all()
        .unwrap_err();
    assert!(err.is_encrypted_field_not_queryable());
    // Rejected before any request was made.
    let inner = exec.lock();
    assert!(inner.queries.is_empty() && inner.scans.is_empty());
}

#[test]
fn s6_roundtrip_with_provider() {
    let exec = Arc::new(MockExecutor::default());
    let db = TheoryDb::builder(exec)
        .registry(Arc::new(Registry::new()))
        .data_key_provider(Arc::new(XorKms))
        .build();

    let mut record = user("u#1", "profile");
    record.secret = Some("hunter2".into());
    let item = db.marshal_item(&record).unwrap();
    assert!(matches!(item["secret"], Av::M(_)));
    let back: User = db.from_item(&item).unwrap();
    assert_eq!(back.secret.as_deref(), Some("hunter2"));
}

// ---------------------------------------------------------------------------
// Create, delete, transactions
// ---------------------------------------------------------------------------

#[test]
fn create_guards_on_key_absence_and_initializes_version() {
    let (exec, db) = fresh_db();
    let record = Setting {
        pk: "s#1".into(),
        title: "greeting".into(),
        version: 0,
    };
    db.model(record).create().unwrap();

    let inner = exec.lock();
    let (q, item) = &inner.put_items[0];
    assert_eq!(q.operation, Some(Operation::PutItem));
    assert_eq!(
        q.condition_expression.as_deref(),
        Some("attribute_not_exists(#n1)")
    );
    assert_eq!(q.expression_attribute_names["#n1"], "pk");
    assert!(q.expression_attribute_values.is_empty());
    assert_eq!(item["version"], Av::N("1".into()));
    assert_eq!(item["title"], Av::s("greeting"));
}

#[test]
fn delete_carries_version_guard() {
    let (exec, db) = fresh_db();
    let record = Setting {
        pk: "s#1".into(),
        title: "x".into(),
        version: 3,
    };
    db.model(record).delete().unwrap();

    let inner = exec.lock();
    let (q, key) = &inner.delete_items[0];
    assert_eq!(q.condition_expression.as_deref(), Some("#n1 = :v1"));
    assert_eq!(q.expression_attribute_names["#n1"], "version");
    assert_eq!(q.expression_attribute_values[":v1"], Av::N("3".into()));
    assert_eq!(key["pk"], Av::s("s#1"));
}

#[test]
fn delete_without_key_is_missing_primary_key() {
    let (_exec, db) = fresh_db();
    let err = db.model(Setting::default()).delete().unwrap_err();
    assert!(matches!(
        err,
        TheoryError::Model(theorydb::ModelError::MissingPrimaryKey { .. })
    ));
}

#[test]
fn transaction_reports_original_indices() {
    let (exec, db) = fresh_db();
    exec.lock().transact_reasons = Some(vec![
        Some("None".into()),
        Some("ConditionalCheckFailed".into()),
    ]);

    let first = Setting {
        pk: "s#1".into(),
        title: "a".into(),
        version: 0,
    };
    let second = Setting {
        pk: "s#2".into(),
        title: "b".into(),
        version: 2,
    };
    let err = db
        .transaction()
        .put(&first)
        .update(&second, &["title"])
        .execute()
        .unwrap_err();

    let TheoryError::TransactionFailed { errors } = err else {
        panic!("expected TransactionFailed");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].operation_index, 1);
    assert_eq!(errors[0].operation, "Update");
    assert_eq!(errors[0].reason, "ConditionalCheckFailed");
}

#[test]
fn transaction_cap_aborts_before_dispatch() {
    let (exec, db) = fresh_db();
    let mut tx = db.transaction();
    for i in 0..101 {
        tx = tx.put(&Setting {
            pk: format!("s#{i}"),
            title: "x".into(),
            version: 0,
        });
    }
    let err = tx.execute().unwrap_err();
    assert!(err.is_invalid_value());
    assert!(exec.lock().transactions.is_empty());
}

#[test]
fn transaction_mixed_operations_assemble_in_order() {
    let (exec, db) = fresh_db();
    let a = Setting {
        pk: "s#1".into(),
        title: "a".into(),
        version: 0,
    };
    let b = Setting {
        pk: "s#2".into(),
        title: "b".into(),
        version: 5,
    };
    db.transaction()
        .create(&a)
        .update(&b, &["title"])
        .check_version(&b, 5)
        .delete(&a)
        .execute()
        .unwrap();

    let inner = exec.lock();
    let items = &inner.transactions[0];
    assert_eq!(items.len(), 4);
    assert_eq!(items[0].query.operation, Some(Operation::PutItem));
    assert!(items[0].item.is_some());
    assert_eq!(items[1].query.operation, Some(Operation::UpdateItem));
    assert!(items[1].key.is_some());
    // The version update pairs condition and increment.
    assert!(items[1].query.condition_expression.is_some());
    assert!(
        items[1]
            .query
            .update_expression
            .as_deref()
            .unwrap()
            .starts_with("SET")
    );
    assert_eq!(items[3].query.operation, Some(Operation::DeleteItem));
}

// ---------------------------------------------------------------------------
// Scan fan-out and counts
// ---------------------------------------------------------------------------

#[test]
fn scan_all_segments_compiles_one_request_per_segment() {
    let (exec, db) = fresh_db();
    let _: Vec<User> = db.model(User::default()).scan_all_segments(4).unwrap();

    let inner = exec.lock();
    assert_eq!(inner.scans.len(), 4);
    for (segment, scan) in inner.scans.iter().enumerate() {
        assert_eq!(scan.operation, Some(Operation::Scan));
        assert_eq!(scan.segment, Some(segment as u32));
        assert_eq!(scan.total_segments, Some(4));
    }
}

#[test]
fn count_selects_count() {
    let (exec, db) = fresh_db();
    exec.lock().query_output = QueryOutput {
        items: Vec::new(),
        last_evaluated_key: None,
        count: 12,
    };
    let n = db
        .model(User::default())
        .where_("pk", "=", "u#1")
        .count()
        .unwrap();
    assert_eq!(n, 12);
    assert_eq!(
        exec.lock().queries[0].select,
        Some(theorydb::Select::Count)
    );
}

#[test]
fn full_key_equality_compiles_to_get_item() {
    let (exec, db) = fresh_db();
    exec.lock().get_output = Some(Item::from([
        ("pk".to_string(), Av::s("u#1")),
        ("sk".to_string(), Av::s("profile")),
        ("status".to_string(), Av::s("active")),
    ]));

    let found: User = db
        .model(User::default())
        .where_("pk", "=", "u#1")
        .where_("sk", "=", "profile")
        .first()
        .unwrap();
    assert_eq!(found.status, "active");

    let inner = exec.lock();
    assert_eq!(inner.get_items.len(), 1);
    let (q, key) = &inner.get_items[0];
    assert_eq!(q.operation, Some(Operation::GetItem));
    assert!(q.key_condition_expression.is_none());
    assert_eq!(key["pk"], Av::s("u#1"));
    assert_eq!(key["sk"], Av::s("profile"));
}

#[test]
fn first_on_missing_item_is_not_found() {
    let (_exec, db) = fresh_db();
    let err = db
        .model(User::default())
        .where_("pk", "=", "u#1")
        .where_("sk", "=", "profile")
        .first()
        .unwrap_err();
    assert!(err.is_not_found());
}

// ---------------------------------------------------------------------------
// Filter groups
// ---------------------------------------------------------------------------

#[test]
fn filter_groups_compose_with_parentheses() {
    let (exec, db) = fresh_db();
    let _: Vec<User> = db
        .model(User::default())
        .where_("pk", "=", "u#1")
        .filter("status", "=", "active")
        .or_filter_group(|g| {
            g.filter("status", "=", "pending").filter("sk", ">", "2024")
        })
        .all()
        .unwrap();

    let inner = exec.lock();
    let q = &inner.queries[0];
    assert_eq!(
        q.filter_expression.as_deref(),
        Some("#STATUS = :v2 OR (#STATUS = :v3 AND #n2 > :v4)")
    );
}
