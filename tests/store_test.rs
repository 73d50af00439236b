//! Phrase store persistence tests

use xtalk::store::PhraseStore;

#[test]
fn test_first_open_writes_default_board() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("phrases.json");

    let store = PhraseStore::load(&path).unwrap();
    assert!(path.is_file());
    assert_eq!(store.path(), Some(path.as_path()));
    assert_eq!(
        store.list_categories(),
        vec![
            "clothing_food_housing_transport",
            "relationships",
            "actions",
            "emotions",
            "requests",
            "other",
            "time",
            "noun"
        ]
    );
    assert!(store.list_phrases("noun").contains(&"厕所".to_string()));
}

#[test]
fn test_changes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phrases.json");

    {
        let mut store = PhraseStore::load(&path).unwrap();
        store.upsert_phrase("noun", "轮椅").unwrap();
        store.delete_by_category_and_text("noun", "鞋").unwrap();
        store.upsert_phrase("family", "孙子").unwrap();
    }

    let store = PhraseStore::load(&path).unwrap();
    let nouns = store.list_phrases("noun");
    assert_eq!(nouns.last().map(String::as_str), Some("轮椅"));
    assert!(!nouns.contains(&"鞋".to_string()));
    assert_eq!(store.list_categories().last().map(String::as_str), Some("family"));
}

#[test]
fn test_ids_stay_unique_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phrases.json");

    let first = {
        let mut store = PhraseStore::load(&path).unwrap();
        store.upsert_phrase("noun", "轮椅").unwrap()
    };

    let mut store = PhraseStore::load(&path).unwrap();
    let second = store.upsert_phrase("noun", "拐杖").unwrap();
    assert!(second > first);
    assert_eq!(store.get(first).unwrap().text, "轮椅");
}

#[test]
fn test_file_is_flat_record_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phrases.json");
    PhraseStore::load(&path).unwrap();

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let records = value.as_array().unwrap();
    assert_eq!(records[0]["id"], 1);
    assert_eq!(records[0]["category"], "clothing_food_housing_transport");
    assert_eq!(records[0]["text"], "我");
}

#[test]
fn test_replace_phrase_edits_in_category() {
    let mut store = PhraseStore::seeded();
    let before = store.list_phrases("time").len();

    let id = store.replace_phrase("time", "刚才", "现在").unwrap();
    let times = store.list_phrases("time");
    assert_eq!(times.len(), before);
    assert!(times.contains(&"现在".to_string()));
    assert!(!times.contains(&"刚才".to_string()));
    assert_eq!(store.get(id).unwrap().category, "time");
}

#[test]
fn test_replace_with_blank_keeps_old_phrase() {
    let mut store = PhraseStore::seeded();
    assert!(store.replace_phrase("time", "刚才", " ").is_err());
    assert!(store.list_phrases("time").contains(&"刚才".to_string()));
}

#[test]
fn test_delete_only_matches_category() {
    let mut store = PhraseStore::in_memory();
    store.upsert_phrase("a", "水").unwrap();
    store.upsert_phrase("b", "水").unwrap();

    assert_eq!(store.delete_by_category_and_text("a", "水").unwrap(), 1);
    assert_eq!(store.delete_by_category_and_text("a", "水").unwrap(), 0);
    assert_eq!(store.list_phrases("b"), vec!["水"]);
}

#[test]
fn test_corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phrases.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(PhraseStore::load(&path).is_err());
}
