// SPARQL JSON Results
//
// Decoding of the `application/sparql-results+json` format into rows.
//
// IRIs and plain literals are stored by their lexical form. Blank nodes,
// literals with a language tag or datatype, and values that would otherwise
// be read back as a different kind of term are stored in SPARQL syntax, so a
// value can be sent back to a source as the exact term it came from.

use std::collections::HashMap;

use crossbeam::channel::Sender;
use serde::Deserialize;

use crate::common::{Message, Row};
use crate::logical::service::{is_iri, needs_quoting, quote_literal};
use crate::source::{push_row, SourceResult};

const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

/// One RDF term of a binding
#[derive(Debug, Clone, Deserialize)]
pub struct BindingValue {
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "xml:lang", default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
}

impl BindingValue {
    /// The row value standing for this term
    pub fn into_row_value(self) -> String {
        match self.kind.as_deref() {
            Some("uri") if is_iri(&self.value) => self.value,
            Some("uri") => format!("<{}>", self.value),
            Some("bnode") => format!("_:{}", self.value),
            _ => match (self.lang, self.datatype) {
                (Some(lang), _) => format!("{}@{}", quote_literal(&self.value), lang),
                (None, Some(datatype)) if datatype != XSD_STRING => {
                    format!("{}^^<{}>", quote_literal(&self.value), datatype)
                }
                _ if needs_quoting(&self.value) => quote_literal(&self.value),
                _ => self.value,
            },
        }
    }
}

/// Lexical form of a row value, with the quotes, language tag and datatype
/// of a written literal stripped
pub fn lexical_form(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.rfind('"').map(|end| &rest[..end]))
        .unwrap_or(value)
}

/// A single solution as it appears on the wire
pub type Binding = HashMap<String, BindingValue>;

#[derive(Debug, Clone, Deserialize)]
pub struct ResultBindings {
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// A complete results document (SELECT or ASK)
#[derive(Debug, Clone, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub results: Option<ResultBindings>,
    #[serde(default)]
    pub boolean: Option<bool>,
}

/// Flatten a wire binding into a row
pub fn binding_to_row(binding: Binding) -> Row {
    Row::from_pairs(binding.into_iter().map(|(var, term)| (var, term.into_row_value())))
}

/// Push every solution of a results document onto `out`
pub fn emit(results: SparqlResults, out: &Sender<Message>) -> SourceResult<Option<bool>> {
    if let Some(results) = results.results {
        for binding in results.bindings {
            push_row(out, binding_to_row(binding))?;
        }
    }
    Ok(results.boolean)
}

/// True for JSON media types, ignoring parameters such as `charset`
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}
