use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam::channel::unbounded;
use tempfile::NamedTempFile;

use fedquery::catalog::{Catalog, EndpointCatalog};
use fedquery::common::{Message, Row};
use fedquery::config::FederationConfig;
use fedquery::source::stream::decode_stream;
use fedquery::source::{HttpContactor, SourceContactor};

#[path = "../common/mod.rs"]
mod common;

use common::rows;

const SELECT_RESULTS: &str = r#"{
    "head": { "vars": ["s", "label"] },
    "results": { "bindings": [
        { "s": { "type": "uri", "value": "http://example.org/a" },
          "label": { "type": "literal", "value": "A" } },
        { "s": { "type": "uri", "value": "http://example.org/b" } }
    ] }
}"#;

fn contact(contactor: &dyn SourceContactor, endpoint: &str) -> Vec<Message> {
    let (tx, rx) = unbounded();
    contactor.contact(endpoint, "SELECT * WHERE { ?s ?p ?o }", &tx, 1024);
    drop(tx);
    rx.iter().collect()
}

// Serve a single HTTP request with the given content type and body,
// returning the endpoint URL
fn serve_once(content_type: &'static str, body: &'static str) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        // Skip the request line and headers
        while reader.read_line(&mut line).is_ok_and(|n| n > 0) {
            if line == "\r\n" {
                break;
            }
            line.clear();
        }
        let mut stream = reader.into_inner();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
    });

    Ok(format!("http://{}/sparql", addr))
}

#[test]
fn test_http_contactor_decodes_results() -> Result<()> {
    let endpoint = serve_once("application/sparql-results+json; charset=utf-8", SELECT_RESULTS)?;
    let contactor = HttpContactor::new(Duration::from_secs(5));

    let messages = contact(&contactor, &endpoint);
    assert_eq!(messages.len(), 3);
    assert!(messages[2].is_eof());
    assert_eq!(
        rows(&messages),
        vec![
            Row::from_pairs([("s", "http://example.org/a"), ("label", "A")]),
            Row::from_pairs([("s", "http://example.org/b")]),
        ]
    );
    Ok(())
}

#[test]
fn test_non_json_answer_is_ignored() -> Result<()> {
    let endpoint = serve_once("text/html", "<html><body>not here</body></html>")?;
    let contactor = HttpContactor::new(Duration::from_secs(5));
    assert_eq!(contact(&contactor, &endpoint), vec![Message::Eof]);
    Ok(())
}

#[test]
fn test_unreachable_endpoint_is_empty() {
    let contactor = HttpContactor::new(Duration::from_secs(2));
    assert_eq!(contact(&contactor, "http://127.0.0.1:1/sparql"), vec![Message::Eof]);
}

#[test]
fn test_decode_package_stream_from_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, r#"{{"head": {{"vars": ["s"]}}}}"#)?;
    writeln!(file, r#"{{"s": {{"type": "uri", "value": "http://example.org/1"}}}}"#)?;
    writeln!(file, "{}", SELECT_RESULTS)?;
    writeln!(file, r#"{{"s": {{"type": "literal", "value": "last"}}}}"#)?;
    file.flush()?;

    let (tx, rx) = unbounded();
    let answer = decode_stream(file.reopen()?, &tx)?;
    drop(tx);
    let messages: Vec<Message> = rx.iter().collect();

    assert_eq!(answer, None);
    // The decoder never terminates the stream itself
    assert!(messages.iter().all(|m| !m.is_eof()));
    let values: Vec<String> = rows(&messages)
        .iter()
        .filter_map(|r| r.get("s").map(str::to_string))
        .collect();
    assert_eq!(values, vec!["http://example.org/1", "http://example.org/a", "http://example.org/b", "last"]);
    Ok(())
}

#[test]
fn test_decode_ask_package() -> Result<()> {
    let (tx, rx) = unbounded();
    let answer = decode_stream(r#"{"head": {}} {"boolean": true}"#.as_bytes(), &tx)?;
    drop(tx);
    assert_eq!(answer, Some(true));
    assert_eq!(rx.iter().count(), 0);
    Ok(())
}

#[test]
fn test_load_catalog_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "# endpoint prefixes")?;
    writeln!(file, "http://dbpedia.org/sparql http://dbpedia.org")?;
    writeln!(file, "http://drugbank/sparql http://www4.wiwiss.fu-berlin.de/drugbank http://bio2rdf.org")?;
    file.flush()?;

    let catalog = Catalog::from_file(file.path())?;
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.endpoint_prefixes("http://drugbank/sparql").len(), 2);
    assert!(catalog.endpoint_prefixes("http://nowhere/sparql").is_empty());
    assert!(Catalog::from_file(file.path().with_extension("missing")).is_err());
    Ok(())
}

#[test]
fn test_load_config_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    write!(file, r#"{{"adaptive": false, "buffer_size": 4096}}"#)?;
    file.flush()?;

    let config = FederationConfig::from_file(file.path())?;
    assert!(!config.adaptive);
    assert_eq!(config.buffer_size, 4096);
    assert_eq!(config.request_timeout_ms, FederationConfig::default().request_timeout_ms);

    let mut invalid = NamedTempFile::new()?;
    write!(invalid, r#"{{"buffer_size": 0}}"#)?;
    invalid.flush()?;
    assert!(FederationConfig::from_file(invalid.path()).is_err());
    Ok(())
}
