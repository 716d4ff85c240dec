mod common;

use mockito::Server;
use papersum::retry::RetryPolicy;
use papersum::search::biorxiv::{BiorxivClient, Interval, PreprintServer};
use papersum::search::filter_entries;

fn details(records: &[(&str, &str, &str)]) -> String {
    let collection: Vec<serde_json::Value> = records
        .iter()
        .map(|(doi, title, category)| {
            serde_json::json!({
                "doi": doi,
                "title": title,
                "authors": "Franklin, R.; Crick, F.",
                "author_corresponding": "Rosalind Franklin",
                "author_corresponding_institution": "King's College",
                "date": "2023-05-02",
                "version": "1",
                "type": "new results",
                "license": "cc_by",
                "category": category,
                "jatsxml": "https://www.biorxiv.org/content/early/x.source.xml",
                "abstract": "We align reads\nwith a new index.",
                "published": "NA",
                "server": "biorxiv"
            })
        })
        .collect();
    serde_json::json!({
        "messages": [{"status": "ok", "interval": "2023-05-01:2023-05-03", "cursor": 0, "count": records.len()}],
        "collection": collection
    })
    .to_string()
}

#[tokio::test]
async fn test_search_filters_categories_and_downloads() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let query_mock = server
        .mock("GET", "/details/biorxiv/2023-05-01/2023-05-03/0")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(details(&[
            ("10.1101/2023.05.01.000001", "Fast Read\n Alignment", "Bioinformatics"),
            ("10.1101/2023.05.01.000002", "Bird Song", "zoology"),
            ("10.1101/2023.05.01.000003", "Index Structures", "bioinformatics"),
        ]))
        .expect(1)
        .create_async()
        .await;
    let pdf_mock = server
        .mock("GET", "/content/10.1101/2023.05.01.000001v1.full.pdf")
        .with_status(200)
        .with_header("content-type", "application/pdf")
        .with_body(common::three_page_pdf())
        .create_async()
        .await;

    let client = BiorxivClient::new(PreprintServer::Biorxiv)
        .with_api_base(&url)
        .with_content_base(&url)
        .with_retry(RetryPolicy::immediate(2));
    let interval: Interval = "2023-05-01:2023-05-03".parse().unwrap();
    let entries = client
        .search(interval, &["bioinformatics".to_string()], 1)
        .await
        .unwrap();
    query_mock.assert_async().await;

    // Zoology is dropped and the listing is cut to one result.
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.title, "Fast Read Alignment");
    assert_eq!(entry.authors, vec!["Franklin, R.", "Crick, F."]);
    assert_eq!(entry.entry_id, "https://doi.org/10.1101/2023.05.01.000001");
    assert_eq!(filter_entries(entries.clone(), &["new index".to_string()]).len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let papers = client.download_all(entries, dir.path()).await.unwrap();
    pdf_mock.assert_async().await;

    assert_eq!(papers.len(), 1);
    let paper = &papers[0];
    assert_eq!(paper.title(), "Fast Read Alignment");
    assert_eq!(paper.url, "https://doi.org/10.1101/2023.05.01.000001");
    assert_eq!(paper.abstract_text(), "We align reads with a new index.");
    assert!(paper.path.is_file());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let failing = server
        .mock("GET", "/details/medrxiv/3d/0")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let client = BiorxivClient::new(PreprintServer::Medrxiv)
        .with_api_base(&url)
        .with_retry(RetryPolicy::immediate(2));
    let err = client.search(Interval::Days(3), &[], 5).await.unwrap_err();
    failing.assert_async().await;
    assert!(err.to_string().contains("503"), "{}", err);
}

#[tokio::test]
async fn test_empty_listing() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let mock = server
        .mock("GET", "/details/biorxiv/2d/0")
        .with_status(200)
        .with_body(r#"{"messages":[{"status":"no posts found"}]}"#)
        .create_async()
        .await;

    let client = BiorxivClient::default().with_api_base(&url);
    let entries = client.search(Interval::default(), &[], 20).await.unwrap();
    mock.assert_async().await;
    assert!(entries.is_empty());
}
