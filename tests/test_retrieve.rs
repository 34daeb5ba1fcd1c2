use bibharvest::bib::{parse_bibtex, Entry};
use bibharvest::retrieve::sources::SourceConfig;
use bibharvest::retrieve::{Retriever, Source};
use mockito::{Matcher, Server, ServerGuard};
use std::fs;
use tempfile::tempdir;

fn entry_from(bibtex: &str) -> Entry {
    let records = parse_bibtex(bibtex);
    assert_eq!(records.len(), 1);
    Entry::from_record(&records[0])
}

fn config_for(server: &ServerGuard) -> SourceConfig {
    SourceConfig {
        unpaywall_base: format!("{}/v2", server.url()),
        unpaywall_email: "test@example.com".to_string(),
        arxiv_base: format!("{}/pdf", server.url()),
        search_base: format!("{}/paper/search", server.url()),
        scihub_base: None,
    }
}

fn pdf_mock(server: &mut ServerGuard, path: &str) -> mockito::Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", "application/pdf")
        .with_body("%PDF-1.4 mock")
        .create()
}

#[test]
fn test_doi_open_access_via_unpaywall() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    let _unpaywall = server
        .mock("GET", "/v2/10.1234/abc.5678")
        .match_query(Matcher::UrlEncoded("email".into(), "test@example.com".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"best_oa_location": {{"url_for_pdf": "{}/files/paper.pdf"}}}}"#,
            server.url()
        ))
        .create();
    let _pdf = pdf_mock(&mut server, "/files/paper.pdf");

    let entry = entry_from(r#"@article{k, title = {Open Access Paper Title}, doi = {10.1234/ABC.5678}}"#);
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::DoiOpenAccess);
    assert_eq!(outcome.attempted, vec![Source::DoiOpenAccess]);
    let pdf = outcome.pdf_path.unwrap();
    assert_eq!(fs::read_to_string(pdf).unwrap(), "%PDF-1.4 mock");
}

#[test]
fn test_unpaywall_falls_back_to_landing_page_url() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    let _unpaywall = server
        .mock("GET", "/v2/10.1234/xyz")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"best_oa_location": {{"url_for_pdf": null, "url": "{}/landing.pdf"}}}}"#,
            server.url()
        ))
        .create();
    let _pdf = pdf_mock(&mut server, "/landing.pdf");

    let entry = entry_from(r#"@article{k, title = {Landing Page Paper}, doi = {10.1234/xyz}}"#);
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::DoiOpenAccess);
}

#[test]
fn test_content_type_mismatch_is_a_soft_failure() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    // Unpaywall points at a URL that serves HTML, not a PDF
    let _unpaywall = server
        .mock("GET", "/v2/10.1234/html")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"best_oa_location": {{"url_for_pdf": "{}/not-a-pdf"}}}}"#,
            server.url()
        ))
        .create();
    let _html = server
        .mock("GET", "/not-a-pdf")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html></html>")
        .create();

    let entry = entry_from(r#"@article{k, doi = {10.1234/html}}"#);
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    // The whole chain is exhausted without a fatal error
    assert_eq!(outcome.source_used, Source::None);
    assert!(outcome.pdf_path.is_none());
    assert_eq!(
        outcome.attempted,
        vec![
            Source::DoiOpenAccess,
            Source::Arxiv,
            Source::DirectUrl,
            Source::TitleSearch
        ]
    );
}

#[test]
fn test_arxiv_is_tried_before_title_search() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    let _arxiv = pdf_mock(&mut server, "/pdf/2104.08653.pdf");
    // Title search must never be reached for an entry with an arXiv ID
    let search = server
        .mock("GET", "/paper/search")
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let entry = entry_from(
        r#"@article{k, title = {An arXiv Hosted Paper}, eprint = {2104.08653}}"#,
    );
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::Arxiv);
    assert_eq!(outcome.attempted, vec![Source::DoiOpenAccess, Source::Arxiv]);
    search.assert();
}

#[test]
fn test_direct_pdf_url() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    let _pdf = pdf_mock(&mut server, "/papers/direct.pdf");

    let entry = entry_from(&format!(
        r#"@article{{k, title = {{Directly Linked Paper}}, url = {{{}/papers/direct.pdf}}}}"#,
        server.url()
    ));
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::DirectUrl);
}

#[test]
fn test_landing_page_anchor_scraping() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    let _landing = server
        .mock("GET", "/article/view")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(
            r#"<html><body>
                <a href="/article/supplement.pdf">supplement</a>
                <a href="/article/fulltext">full text</a>
                <a href="about.html">about</a>
            </body></html>"#,
        )
        .create();
    // First candidate serves HTML and is rejected by content type
    let _supplement = server
        .mock("GET", "/article/supplement.pdf")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>not really</html>")
        .create();
    let _fulltext = pdf_mock(&mut server, "/article/fulltext");

    let entry = entry_from(&format!(
        r#"@article{{k, title = {{Scraped Landing Page Paper}}, url = {{{}/article/view}}}}"#,
        server.url()
    ));
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::ScrapedUrl);
    assert_eq!(
        fs::read_to_string(outcome.pdf_path.unwrap()).unwrap(),
        "%PDF-1.4 mock"
    );
}

#[test]
fn test_title_search_takes_first_open_access_result() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    let _search = server
        .mock("GET", "/paper/search")
        .match_query(Matcher::UrlEncoded(
            "query".into(),
            // Punctuation stripped, original case preserved
            "A Paper Found Only by Title".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"data": [
                {{"title": "no pdf here", "openAccessPdf": null}},
                {{"title": "match", "openAccessPdf": {{"url": "{}/oa/match.pdf"}}}}
            ]}}"#,
            server.url()
        ))
        .create();
    let _pdf = pdf_mock(&mut server, "/oa/match.pdf");

    let entry = entry_from(r#"@article{k, title = {A Paper: Found Only by Title!}}"#);
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::TitleSearch);
    assert_eq!(
        outcome.attempted,
        vec![
            Source::DoiOpenAccess,
            Source::Arxiv,
            Source::DirectUrl,
            Source::TitleSearch
        ]
    );
}

#[test]
fn test_scihub_fallback_scrapes_viewer_frame() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    // Unpaywall knows nothing about this DOI
    let _unpaywall = server
        .mock("GET", "/v2/10.5555/closed")
        .match_query(Matcher::Any)
        .with_status(404)
        .create();
    let _scihub = server
        .mock("GET", "/10.5555/closed")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<html><iframe id="pdf" src="/downloads/closed.pdf"></iframe></html>"#)
        .create();
    let _pdf = pdf_mock(&mut server, "/downloads/closed.pdf");

    let mut config = config_for(&server);
    config.scihub_base = Some(server.url());

    let entry = entry_from(r#"@article{k, doi = {10.5555/closed}}"#);
    let retriever = Retriever::new(pdf_dir.path().to_path_buf(), None, config).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::ScrapedUrl);
    assert_eq!(outcome.attempted, vec![Source::DoiOpenAccess]);
}

#[test]
fn test_scihub_disabled_by_default() {
    let mut server = Server::new();
    let pdf_dir = tempdir().unwrap();

    let _unpaywall = server
        .mock("GET", "/v2/10.5555/closed")
        .match_query(Matcher::Any)
        .with_status(404)
        .create();
    // Would satisfy the entry if the fallback were consulted
    let scihub = server
        .mock("GET", "/10.5555/closed")
        .expect(0)
        .create();

    let entry = entry_from(r#"@article{k, doi = {10.5555/closed}}"#);
    let retriever =
        Retriever::new(pdf_dir.path().to_path_buf(), None, config_for(&server)).unwrap();
    let outcome = retriever.retrieve(&entry);

    assert_eq!(outcome.source_used, Source::None);
    scihub.assert();
}
