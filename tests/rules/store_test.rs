//! Ruleset store contract, exercised against every implementation.

use reconciler::rules::{
    FileRulesetStore, MatchType, MemoryRulesetStore, ReconciliationRule, RuleOrigin, RuleSet,
    RulesetStore, SqliteRulesetStore, StoreError,
};

fn ruleset(source: &str) -> RuleSet {
    let rules = vec![
        ReconciliationRule::new(
            source,
            vec!["id".into()],
            "target",
            vec!["source_id".into()],
            MatchType::Exact,
            1.0,
            RuleOrigin::ExplicitPair,
        ),
        ReconciliationRule::new(
            source,
            vec!["email".into()],
            "target",
            vec!["email".into()],
            MatchType::Fuzzy,
            0.75,
            RuleOrigin::Pattern,
        ),
    ];
    RuleSet::new(source, "target", rules, Vec::new()).unwrap()
}

/// Save, load, refuse overwrite, list, miss.
fn check_contract(store: &dyn RulesetStore) {
    let first = ruleset("accounts");
    let id = store.save(&first).unwrap();
    assert_eq!(id, first.ruleset_id);

    let loaded = store.load(&id).unwrap();
    assert_eq!(loaded.ruleset_id, first.ruleset_id);
    assert_eq!(loaded.fingerprint, first.fingerprint);
    let ids: Vec<_> = loaded.rules.iter().map(|r| r.rule_id.as_str()).collect();
    let expected: Vec<_> = first.rules.iter().map(|r| r.rule_id.as_str()).collect();
    assert_eq!(ids, expected);

    assert!(matches!(store.save(&first), Err(StoreError::AlreadyExists(_))));

    let second = ruleset("contacts");
    store.save(&second).unwrap();
    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|s| s.ruleset_id == second.ruleset_id && s.rule_count == 2));

    assert!(matches!(store.load("rs_missing"), Err(StoreError::NotFound(_))));
}

#[test]
fn test_sqlite_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteRulesetStore::open(dir.path().join("nested").join("rulesets.db")).unwrap();
    check_contract(&store);
}

#[test]
fn test_file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileRulesetStore::open(dir.path().join("rulesets")).unwrap();
    check_contract(&store);
}

#[test]
fn test_memory_store_contract() {
    check_contract(&MemoryRulesetStore::new());
}

#[test]
fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rulesets.db");
    let saved = ruleset("ledger");
    {
        let store = SqliteRulesetStore::open(&path).unwrap();
        store.save(&saved).unwrap();
    }

    let reopened = SqliteRulesetStore::open(&path).unwrap();
    assert_eq!(reopened.load(&saved.ruleset_id).unwrap().fingerprint, saved.fingerprint);
}

#[test]
fn test_file_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileRulesetStore::open(dir.path()).unwrap();
    assert!(matches!(store.load("../etc/passwd"), Err(StoreError::InvalidId(_))));
}
