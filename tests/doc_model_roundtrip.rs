use docsync::docmodel::{self, schema};
use docsync::planner::merge_preferred_section_order;

fn docs_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    schema::ensure_schema_file(dir.path()).unwrap();
    dir
}

#[test]
fn model_from_markdown_saves_and_reloads_identically() {
    let dir = docs_dir();
    let path = dir.path().join("doc_model.json");

    let model = docmodel::build_from_markdown("# Overview\n\nhello\n");
    docmodel::save(&path, &model).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    let loaded = docmodel::load(&path).unwrap();
    docmodel::save(&path, &loaded).unwrap();
    let second = std::fs::read_to_string(&path).unwrap();

    assert_eq!(first, second);
    assert!(second.ends_with('\n'));
}

#[test]
fn undefined_status_literal_fails_schema_validation() {
    let dir = docs_dir();
    let path = dir.path().join("doc_model.json");

    let mut model = docmodel::build_from_markdown("# Overview\n\nhello\n");
    model.section_by_id_mut("overview").unwrap().status = "archived".into();

    let err = docmodel::save(&path, &model).unwrap_err().to_string();
    assert!(err.contains("schema validation"), "unexpected error: {err}");
    assert!(!path.exists(), "invalid model must not be written");
}

#[test]
fn normalization_is_idempotent_over_arbitrary_models() {
    let inputs = [
        "# Overview\n\nhello\n",
        "no headings at all, just prose\n",
        "## Deep First\n\nx\n\n# Shallow After\n\ny\n",
        "",
    ];
    for input in inputs {
        let mut model = docmodel::build_from_markdown(input);
        docmodel::normalize(&mut model);
        let once = serde_json::to_string(&model).unwrap();
        docmodel::normalize(&mut model);
        assert_eq!(once, serde_json::to_string(&model).unwrap(), "input: {input:?}");
    }
}

#[test]
fn canonical_sections_lead_the_root_listing() {
    let model = docmodel::build_from_markdown("# Custom Notes\n\nnotes\n");
    assert_eq!(
        &model.document.root_section_ids[..3],
        &["overview", "key-features", "development"]
    );
    assert!(model
        .document
        .root_section_ids
        .contains(&"custom-notes".to_string()));
    // Required sections always resolve.
    for required in &model.policies.required_section_ids {
        assert!(model.section_by_id(required).is_some());
    }
}

#[test]
fn preferred_section_order_merges_stably() {
    let base: Vec<String> = ["overview", "key-features", "development"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let preferred: Vec<String> = ["development", "overview"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(
        merge_preferred_section_order(&base, &preferred),
        vec!["development", "overview", "key-features"]
    );

    // Preferences unknown to the base are preserved in front.
    let exotic: Vec<String> = vec!["changelog".into()];
    assert_eq!(
        merge_preferred_section_order(&base, &exotic),
        vec!["changelog", "overview", "key-features", "development"]
    );
}
