use bibharvest::error::HarvestError;
use bibharvest::pipeline::Pipeline;
use bibharvest::retrieve::sources::SourceConfig;
use mockito::{Server, ServerGuard};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

const BIB_CONTENT: &str = r#"@article{doe2019graph,
  title = {Graph Embeddings for Retrieval},
  author = {Doe, Jane},
  year = {2019}
}
"#;

const STEM: &str = "Graph_Embeddings_for_Retrieval";

fn tei_fixture() -> String {
    let mut path = Path::new(env!("CARGO_MANIFEST_DIR")).to_path_buf();
    path.push("tests");
    path.push("fixtures");
    path.push("sample.tei.xml");
    fs::read_to_string(&path).expect("Failed to read sample.tei.xml")
}

/// Endpoints no retrieval strategy should succeed against.
fn dead_sources(server: &ServerGuard) -> SourceConfig {
    SourceConfig {
        unpaywall_base: format!("{}/v2", server.url()),
        unpaywall_email: "test@example.com".to_string(),
        arxiv_base: format!("{}/pdf", server.url()),
        search_base: format!("{}/paper/search", server.url()),
        scihub_base: None,
    }
}

/// Write the bib file and pre-seed the PDF artifact so retrieval resolves
/// from the local cache without any network.
fn seeded_workspace(dir: &Path) -> std::path::PathBuf {
    let bib_path = dir.join("refs.bib");
    fs::write(&bib_path, BIB_CONTENT).unwrap();
    let pdf_dir = dir.join("out").join("pdfs");
    fs::create_dir_all(&pdf_dir).unwrap();
    fs::write(pdf_dir.join(format!("{}.pdf", STEM)), b"%PDF-1.4").unwrap();
    bib_path
}

#[test]
fn test_full_run_with_mocked_grobid() {
    let mut server = Server::new();
    let dir = tempdir().unwrap();
    let bib_path = seeded_workspace(dir.path());

    let _alive = server
        .mock("GET", "/api/isalive")
        .with_status(200)
        .with_body("true")
        .create();
    let _process = server
        .mock("POST", "/api/processFulltextDocument")
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(tei_fixture())
        .create();

    let pipeline = Pipeline::new(
        &bib_path,
        &dir.path().join("out"),
        &server.url(),
        None,
        dead_sources(&server),
        Duration::from_millis(0),
    )
    .unwrap();
    let summary = pipeline.run().unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.retrieved, 1);
    assert_eq!(summary.processed, 1);
    assert!(summary.succeeded());

    let tei_path = dir.path().join("out/tei").join(format!("{}.tei.xml", STEM));
    let txt_path = dir.path().join("out/text").join(format!("{}.txt", STEM));
    assert!(tei_path.exists());
    let text = fs::read_to_string(&txt_path).unwrap();
    assert!(text.contains("# Graph Embeddings for Retrieval"));
    assert!(text.contains("## Content"));
    assert!(text.contains("1. Jane Doe. (2019). Graph Embeddings."));
}

#[test]
fn test_rerun_skips_grobid_entirely() {
    let mut server = Server::new();
    let dir = tempdir().unwrap();
    let bib_path = seeded_workspace(dir.path());

    let _alive = server
        .mock("GET", "/api/isalive")
        .with_status(200)
        .expect_at_least(1)
        .create();
    // One structuring call for two runs: the second run must be a no-op
    let process = server
        .mock("POST", "/api/processFulltextDocument")
        .with_status(200)
        .with_body(tei_fixture())
        .expect(1)
        .create();

    let pipeline = Pipeline::new(
        &bib_path,
        &dir.path().join("out"),
        &server.url(),
        None,
        dead_sources(&server),
        Duration::from_millis(0),
    )
    .unwrap();

    let first = pipeline.run().unwrap();
    let second = pipeline.run().unwrap();

    assert_eq!(first.processed, 1);
    assert_eq!(second.processed, 1);
    process.assert();
}

#[test]
fn test_grobid_outage_aborts_extraction_phase() {
    let mut server = Server::new();
    let dir = tempdir().unwrap();
    let bib_path = seeded_workspace(dir.path());

    let _alive = server.mock("GET", "/api/isalive").with_status(500).create();
    let process = server
        .mock("POST", "/api/processFulltextDocument")
        .expect(0)
        .create();

    let pipeline = Pipeline::new(
        &bib_path,
        &dir.path().join("out"),
        &server.url(),
        None,
        dead_sources(&server),
        Duration::from_millis(0),
    )
    .unwrap();
    let err = pipeline.run().unwrap_err();

    assert!(matches!(
        err.downcast_ref::<HarvestError>(),
        Some(HarvestError::ServiceUnavailable { .. })
    ));
    // No PDF was uploaded and no artifact written past the retrieval phase
    process.assert();
    let pdf_path = dir.path().join("out/pdfs").join(format!("{}.pdf", STEM));
    assert!(pdf_path.exists());
    assert!(fs::read_dir(dir.path().join("out/text")).unwrap().next().is_none());
}

#[test]
fn test_extraction_is_skipped_when_nothing_was_retrieved() {
    let mut server = Server::new();
    let dir = tempdir().unwrap();
    // Bib file without a pre-seeded PDF; every strategy will miss
    let bib_path = dir.path().join("refs.bib");
    fs::write(&bib_path, BIB_CONTENT).unwrap();

    let alive = server.mock("GET", "/api/isalive").expect(0).create();

    let pipeline = Pipeline::new(
        &bib_path,
        &dir.path().join("out"),
        &server.url(),
        None,
        dead_sources(&server),
        Duration::from_millis(0),
    )
    .unwrap();
    let summary = pipeline.run().unwrap();

    assert_eq!(summary.retrieved, 0);
    assert_eq!(summary.processed, 0);
    assert!(!summary.succeeded());
    alive.assert();
}

#[test]
fn test_empty_bib_file_is_rejected() {
    let server = Server::new();
    let dir = tempdir().unwrap();
    let bib_path = dir.path().join("empty.bib");
    fs::write(&bib_path, "% nothing here\n").unwrap();

    let err = Pipeline::new(
        &bib_path,
        &dir.path().join("out"),
        &server.url(),
        None,
        dead_sources(&server),
        Duration::from_millis(0),
    )
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<HarvestError>(),
        Some(HarvestError::NoEntries { .. })
    ));
}
