//! RDF reading and writing backed by oxigraph
//!
//! Only three things are ever done with a graph here: read the object of a
//! single predicate, read workout literals and write workout literals.

use crate::error::{Error, Result};
use crate::workout::WorkoutRecord;
use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::vocab::xsd;
use oxigraph::model::{GraphName, GraphNameRef, Literal, NamedNode, Quad, Term};
use oxigraph::sparql::{Query, QueryResults, QuerySolution};
use oxigraph::store::Store;
use std::collections::HashSet;

/// Well-known predicates
pub mod vocab {
    /// `solid:oidcIssuer`
    pub const SOLID_OIDC_ISSUER: &str = "http://www.w3.org/ns/solid/terms#oidcIssuer";
    /// `pim:storage`
    pub const PIM_STORAGE: &str = "http://www.w3.org/ns/pim/space#storage";
    /// `foaf:name`
    pub const FOAF_NAME: &str = "http://xmlns.com/foaf/0.1/name";
    /// LDP resource type
    pub const LDP_RESOURCE: &str = "http://www.w3.org/ns/ldp#Resource";
    /// LDP basic container type
    pub const LDP_BASIC_CONTAINER: &str = "http://www.w3.org/ns/ldp#BasicContainer";
}

/// A parsed RDF document
pub struct RdfDocument {
    store: Store,
}

impl RdfDocument {
    /// Parse a Turtle document, resolving relative IRIs against `base_iri`
    pub fn parse_turtle(body: &[u8], base_iri: &str) -> Result<Self> {
        let store = Store::new().map_err(|e| Error::rdf(e.to_string()))?;
        let parser = RdfParser::from_format(RdfFormat::Turtle)
            .with_base_iri(base_iri)
            .map_err(|e| Error::rdf(format!("invalid base IRI {}: {}", base_iri, e)))?;
        store
            .load_from_reader(parser, body)
            .map_err(|e| Error::rdf(e.to_string()))?;
        Ok(Self { store })
    }

    /// Object of the first `predicate` triple, preferring `subject` when given
    ///
    /// IRIs are returned as-is and literals by their lexical value.
    pub fn object_of(&self, subject: Option<&str>, predicate: &str) -> Result<Option<String>> {
        if let Some(subject) = subject {
            if let Some(value) = self.find_object(Some(subject), predicate)? {
                return Ok(Some(value));
            }
        }
        self.find_object(None, predicate)
    }

    fn find_object(&self, subject: Option<&str>, predicate: &str) -> Result<Option<String>> {
        let predicate = NamedNode::new(predicate).map_err(|e| Error::rdf(e.to_string()))?;
        let subject = subject
            .map(NamedNode::new)
            .transpose()
            .map_err(|e| Error::rdf(e.to_string()))?;

        let quads = self.store.quads_for_pattern(
            subject.as_ref().map(|s| s.as_ref().into()),
            Some(predicate.as_ref()),
            None,
            None,
        );
        for quad in quads {
            let quad = quad.map_err(|e| Error::rdf(e.to_string()))?;
            match quad.object {
                Term::NamedNode(node) => return Ok(Some(node.into_string())),
                Term::Literal(literal) => return Ok(Some(literal.value().to_string())),
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Reconstruct every workout whose subject carries the namespace's `name`
    pub fn workouts(&self, namespace: &str) -> Result<Vec<WorkoutRecord>> {
        let query_str = format!(
            r#"
            PREFIX ci: <{namespace}>

            SELECT ?s ?name ?dateCreated ?dateModified ?datePerformed ?quantity
                   ?duration ?heartRate ?workoutType ?notes ?mediaUri
            WHERE {{
                ?s ci:name ?name .
                OPTIONAL {{ ?s ci:dateCreated ?dateCreated }}
                OPTIONAL {{ ?s ci:dateModified ?dateModified }}
                OPTIONAL {{ ?s ci:datePerformed ?datePerformed }}
                OPTIONAL {{ ?s ci:quantity ?quantity }}
                OPTIONAL {{ ?s ci:duration ?duration }}
                OPTIONAL {{ ?s ci:heartRate ?heartRate }}
                OPTIONAL {{ ?s ci:workoutType ?workoutType }}
                OPTIONAL {{ ?s ci:notes ?notes }}
                OPTIONAL {{ ?s ci:mediaUri ?mediaUri }}
            }}
            "#
        );

        let query = Query::parse(&query_str, None).map_err(|e| Error::rdf(e.to_string()))?;
        let results = self
            .store
            .query(query)
            .map_err(|e| Error::rdf(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::rdf(e.to_string()))?;
                let subject = string_of(&solution, "s");
                let Some((_, id)) = subject.rsplit_once('#') else {
                    tracing::warn!(subject = %subject, "Skipping workout without fragment identifier");
                    continue;
                };
                if !seen.insert(id.to_string()) {
                    continue;
                }
                records.push(WorkoutRecord {
                    id: id.to_string(),
                    name: string_of(&solution, "name"),
                    date_created: long_of(&solution, "dateCreated"),
                    date_modified: long_of(&solution, "dateModified"),
                    date_performed: long_of(&solution, "datePerformed"),
                    quantity: string_of(&solution, "quantity"),
                    duration: string_of(&solution, "duration"),
                    heart_rate: long_of(&solution, "heartRate"),
                    workout_type: string_of(&solution, "workoutType"),
                    notes: string_of(&solution, "notes"),
                    media_uri: string_of(&solution, "mediaUri"),
                });
            }
        }
        Ok(records)
    }
}

fn string_of(solution: &QuerySolution, variable: &str) -> String {
    match solution.get(variable) {
        Some(Term::Literal(literal)) => literal.value().to_string(),
        Some(Term::NamedNode(node)) => node.as_str().to_string(),
        _ => String::new(),
    }
}

fn long_of(solution: &QuerySolution, variable: &str) -> i64 {
    string_of(solution, variable).trim().parse().unwrap_or(0)
}

/// Serialize workouts as `<resource_url>#<id>` subjects under `namespace`
///
/// An empty slice produces an empty, valid Turtle document.
pub fn serialize_workouts(
    records: &[WorkoutRecord],
    resource_url: &str,
    namespace: &str,
) -> Result<String> {
    let store = Store::new().map_err(|e| Error::rdf(e.to_string()))?;
    let predicate = |local: &str| {
        NamedNode::new(format!("{}{}", namespace, local)).map_err(|e| Error::rdf(e.to_string()))
    };

    for record in records {
        let subject = NamedNode::new(format!("{}#{}", resource_url, record.id))
            .map_err(|e| Error::rdf(format!("invalid workout id {}: {}", record.id, e)))?;

        let literals = [
            ("name", Literal::new_simple_literal(&record.name)),
            ("dateCreated", long_literal(record.date_created)),
            ("dateModified", long_literal(record.date_modified)),
            ("datePerformed", long_literal(record.date_performed)),
            ("quantity", Literal::new_simple_literal(&record.quantity)),
            ("duration", Literal::new_simple_literal(&record.duration)),
            ("heartRate", long_literal(record.heart_rate)),
            ("workoutType", Literal::new_simple_literal(&record.workout_type)),
            ("notes", Literal::new_simple_literal(&record.notes)),
            ("mediaUri", Literal::new_simple_literal(&record.media_uri)),
        ];
        for (local, literal) in literals {
            let quad = Quad::new(
                subject.clone(),
                predicate(local)?,
                literal,
                GraphName::DefaultGraph,
            );
            store
                .insert(&quad)
                .map_err(|e| Error::rdf(e.to_string()))?;
        }
    }

    let serializer = RdfSerializer::from_format(RdfFormat::Turtle)
        .with_prefix("ci", namespace)
        .map_err(|e| Error::rdf(e.to_string()))?;
    let bytes = store
        .dump_graph_to_writer(GraphNameRef::DefaultGraph, serializer, Vec::new())
        .map_err(|e| Error::rdf(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::rdf(e.to_string()))
}

fn long_literal(value: i64) -> Literal {
    Literal::new_typed_literal(value.to_string(), xsd::LONG)
}
