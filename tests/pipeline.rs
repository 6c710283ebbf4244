//! End-to-end pipeline tests against mock OpenAlex and PubMed servers.
//!
//! Covers the full resolve -> collect -> enrich -> aggregate flow, the
//! post-disambiguation multi-select merge, and the ambiguous-name path.

use abstractdigger::config::DiggerConfig;
use abstractdigger::corpus::Provenance;
use abstractdigger::openalex::WorkFilters;
use abstractdigger::progress::Phase;
use abstractdigger::service::WorksService;
use abstractdigger::DiggerError;
use std::time::Duration;

fn test_config(openalex_url: String, pubmed_url: String, pubmed_fallback: bool) -> DiggerConfig {
    DiggerConfig {
        openalex_base_url: openalex_url,
        pubmed_base_url: pubmed_url,
        openalex_min_interval: Duration::from_millis(1),
        pubmed_min_interval: Duration::from_millis(1),
        pubmed_fallback,
        max_retries: 1,
        ..DiggerConfig::default()
    }
}

fn author_json(id: &str, name: &str, works: u32) -> String {
    format!(
        r#"{{"id":"https://openalex.org/{id}","display_name":"{name}",
            "works_count":{works},"cited_by_count":{},"affiliations":[]}}"#,
        works * 10
    )
}

#[tokio::test]
async fn full_pipeline_resolves_collects_and_enriches() {
    let mut openalex = mockito::Server::new_async().await;
    let mut pubmed = mockito::Server::new_async().await;

    let _author = openalex
        .mock("GET", "/authors/A5023888391")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(author_json("A5023888391", "Jane Doe", 3))
        .create_async()
        .await;

    // One page of three works: primary abstract, PMID-only, bare.
    let _works = openalex
        .mock("GET", "/works")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"meta":{"count":3,"next_cursor":null},"results":[
                {"id":"https://openalex.org/W1","display_name":"Decodable work",
                 "publication_year":2021,"type":"article","cited_by_count":5,
                 "abstract_inverted_index":{"Background":[0],"matters":[1]}},
                {"id":"https://openalex.org/W2","display_name":"PubMed-backed work",
                 "publication_year":2020,"type":"article","cited_by_count":2,
                 "ids":{"pmid":"https://pubmed.ncbi.nlm.nih.gov/12345678"}},
                {"id":"https://openalex.org/W3","display_name":"A work nobody indexed",
                 "publication_year":2019,"type":"article","cited_by_count":0}
            ]}"#,
        )
        .create_async()
        .await;

    let _efetch = pubmed
        .mock("GET", "/efetch.fcgi")
        .match_query(mockito::Matcher::UrlEncoded(
            "id".to_string(),
            "12345678".to_string(),
        ))
        .with_status(200)
        .with_body("<Abstract><AbstractText>Secondary text.</AbstractText></Abstract>")
        .create_async()
        .await;

    // Title search for the bare work finds nothing.
    let _esearch = pubmed
        .mock("GET", "/esearch.fcgi")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(r#"{"esearchresult":{"idlist":[]}}"#)
        .create_async()
        .await;

    let service = WorksService::new(test_config(openalex.url(), pubmed.url(), true))
        .expect("service builds");
    let (_, mut rx) = service.emitter().subscribe("session-1");

    let corpus = service
        .run(
            Some("session-1"),
            "A5023888391",
            None,
            &WorkFilters::default(),
        )
        .await
        .expect("pipeline succeeds");

    // Records come back in retrieval order regardless of worker completion.
    let ids: Vec<&str> = corpus.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["W1", "W2", "W3"]);

    assert_eq!(corpus.records[0].provenance, Provenance::Primary);
    assert_eq!(
        corpus.records[0].abstract_text.as_deref(),
        Some("Background matters")
    );
    assert_eq!(corpus.records[1].provenance, Provenance::Secondary);
    assert_eq!(
        corpus.records[1].abstract_text.as_deref(),
        Some("Secondary text.")
    );
    assert_eq!(corpus.records[2].provenance, Provenance::None);
    assert_eq!(corpus.records[2].abstract_text, None);

    assert_eq!(corpus.stats.primary, 1);
    assert_eq!(corpus.stats.secondary, 1);
    assert_eq!(corpus.stats.none, 1);
    assert!(!corpus.partial);
    assert_eq!(corpus.identity.display_name, "Jane Doe");

    // The session saw a terminal complete event, exactly once.
    let mut completes = 0;
    let mut last_processing_pct = 0.0f32;
    while let Ok(event) = rx.try_recv() {
        match event.phase {
            Phase::Complete => {
                completes += 1;
                assert!(event.message.contains("primary=1"));
            }
            Phase::Processing => {
                if let Some(pct) = event.percent {
                    assert!(pct >= last_processing_pct);
                    last_processing_pct = pct;
                }
            }
            _ => {}
        }
    }
    assert_eq!(completes, 1);
}

#[tokio::test]
async fn multi_select_merge_dedups_and_self_merge_is_idempotent() {
    let mut openalex = mockito::Server::new_async().await;

    let _a1 = openalex
        .mock("GET", "/authors/A1")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(author_json("A1", "Jane Doe", 2))
        .expect_at_least(1)
        .create_async()
        .await;
    let _a2 = openalex
        .mock("GET", "/authors/A2")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(author_json("A2", "J. Doe", 2))
        .create_async()
        .await;

    let _works_a1 = openalex
        .mock("GET", "/works")
        .match_query(mockito::Matcher::UrlEncoded(
            "filter".to_string(),
            "author.id:A1".to_string(),
        ))
        .with_status(200)
        .with_body(
            r#"{"meta":{"count":2,"next_cursor":null},"results":[
                {"id":"https://openalex.org/W1","display_name":"Shared early work"},
                {"id":"https://openalex.org/W2","display_name":"Only A1"}
            ]}"#,
        )
        .expect_at_least(1)
        .create_async()
        .await;
    let _works_a2 = openalex
        .mock("GET", "/works")
        .match_query(mockito::Matcher::UrlEncoded(
            "filter".to_string(),
            "author.id:A2".to_string(),
        ))
        .with_status(200)
        .with_body(
            r#"{"meta":{"count":2,"next_cursor":null},"results":[
                {"id":"https://openalex.org/W1","display_name":"Shared early work"},
                {"id":"https://openalex.org/W3","display_name":"Only A2"}
            ]}"#,
        )
        .create_async()
        .await;

    let pubmed_url = "http://127.0.0.1:9".to_string(); // never contacted
    let service = WorksService::new(test_config(openalex.url(), pubmed_url, false))
        .expect("service builds");

    // Two distinct identities: union minus the shared work.
    let identities = service
        .resolve_selected(&["A1".to_string(), "A2".to_string()])
        .await
        .expect("selection resolves");
    let merged = service
        .build_corpus(None, identities, &WorkFilters::default())
        .await
        .expect("merged corpus builds");

    let ids: Vec<&str> = merged.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["W1", "W2", "W3"]);
    assert_eq!(merged.identity.display_name, "Jane Doe / J. Doe");
    assert_eq!(merged.identity.works_count, 4);
    assert_eq!(merged.stats.none, 3);

    // Same identity picked twice: identical to the single-identity corpus.
    let single = service
        .build_corpus(
            None,
            service
                .resolve_selected(&["A1".to_string()])
                .await
                .expect("resolves"),
            &WorkFilters::default(),
        )
        .await
        .expect("single corpus builds");
    let doubled = service
        .build_corpus(
            None,
            service
                .resolve_selected(&["A1".to_string(), "A1".to_string()])
                .await
                .expect("resolves"),
            &WorkFilters::default(),
        )
        .await
        .expect("doubled corpus builds");

    assert_eq!(single.records.len(), doubled.records.len());
    assert_eq!(single.stats, doubled.stats);
}

#[tokio::test]
async fn ambiguous_name_ends_session_and_returns_candidates() {
    let mut openalex = mockito::Server::new_async().await;

    let results: Vec<String> = (0..5)
        .map(|i| author_json(&format!("A{i}"), "J. Smith", 100 + i))
        .collect();
    let _search = openalex
        .mock("GET", "/authors")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(format!(r#"{{"results":[{}]}}"#, results.join(",")))
        .create_async()
        .await;

    let pubmed_url = "http://127.0.0.1:9".to_string();
    let service = WorksService::new(test_config(openalex.url(), pubmed_url, false))
        .expect("service builds");
    let (_, mut rx) = service.emitter().subscribe("session-2");

    match service
        .run(Some("session-2"), "J. Smith", None, &WorkFilters::default())
        .await
    {
        Err(DiggerError::Ambiguous(set)) => {
            assert_eq!(set.candidates.len(), 5);
            assert_eq!(set.query, "J. Smith");
        }
        other => panic!("expected Ambiguous, got {other:?}"),
    }

    let mut saw_terminal = false;
    while let Ok(event) = rx.try_recv() {
        if event.phase == Phase::Complete {
            saw_terminal = true;
            assert!(event.message.contains("selection required"));
        }
    }
    assert!(saw_terminal);
}
