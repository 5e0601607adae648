//! SQL template synthesis.
//!
//! Pure functions from table metadata to endpoint descriptors. Identifiers are
//! double-quoted; values only ever appear as `:name` placeholders.

use std::collections::{BTreeMap, HashSet};

use crate::db::{is_placeholder_name, quote_identifier};
use crate::models::{Column, EndpointDescriptor, HttpMethod, TableMetadata};

/// Declared-type fragments that mark a server-generated key.
const AUTO_INCREMENT_MARKERS: &[&str] = &["identity", "autoincrement", "serial"];

/// Best-effort check for a server-generated column type (case-insensitive).
pub fn is_auto_increment(data_type: &str) -> bool {
    let lower = data_type.to_lowercase();
    AUTO_INCREMENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// `GET /{table}` with paging.
pub fn list_endpoint(table: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(
        HttpMethod::Get,
        format!("/{}", table),
        format!("List records from {} table", table),
        format!(
            "SELECT * FROM {} LIMIT :limit OFFSET :offset",
            quote_identifier(table)
        ),
    )
    .with_parameter("limit", "Number of records to return")
    .with_parameter("offset", "Number of records to skip")
}

/// `GET /{table}/:{pk}`.
pub fn get_endpoint(table: &str, pk: &str) -> EndpointDescriptor {
    let param = placeholder_name(pk);
    EndpointDescriptor::new(
        HttpMethod::Get,
        item_path(table, &param),
        format!("Get a record from {} by ID", table),
        format!(
            "SELECT * FROM {} WHERE {} = :{}",
            quote_identifier(table),
            quote_identifier(pk),
            param
        ),
    )
    .with_parameter(param, format!("ID of the {} record", table))
}

/// `DELETE /{table}/:{pk}`.
pub fn delete_endpoint(table: &str, pk: &str) -> EndpointDescriptor {
    let param = placeholder_name(pk);
    EndpointDescriptor::new(
        HttpMethod::Delete,
        item_path(table, &param),
        format!("Delete a record from {} by ID", table),
        format!(
            "DELETE FROM {} WHERE {} = :{}",
            quote_identifier(table),
            quote_identifier(pk),
            param
        ),
    )
    .with_parameter(param, format!("ID of the {} record to delete", table))
}

/// `POST /{table}`, inserting every column except a server-generated key.
pub fn create_endpoint(metadata: &TableMetadata) -> EndpointDescriptor {
    let params = placeholder_names(&metadata.columns);
    let insertable: Vec<(&Column, &String)> = metadata
        .columns
        .iter()
        .zip(&params)
        .filter(|(c, _)| !(c.primary_key && is_auto_increment(&c.data_type)))
        .collect();

    let names = insertable
        .iter()
        .map(|(c, _)| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let values = insertable
        .iter()
        .map(|(_, p)| format!(":{}", p))
        .collect::<Vec<_>>()
        .join(", ");

    EndpointDescriptor::new(
        HttpMethod::Post,
        format!("/{}", metadata.name),
        format!("Create a new record in {} table", metadata.name),
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(&metadata.name),
            names,
            values
        ),
    )
    .with_parameters(column_parameters(&metadata.columns, &params))
}

/// `PUT /{table}/:{pk}`, setting every column but the key.
pub fn update_endpoint(metadata: &TableMetadata, pk: &str) -> EndpointDescriptor {
    let params = placeholder_names(&metadata.columns);
    let assignments = metadata
        .columns
        .iter()
        .zip(&params)
        .filter(|(c, _)| c.name != pk)
        .map(|(c, p)| format!("{} = :{}", quote_identifier(&c.name), p))
        .collect::<Vec<_>>()
        .join(", ");
    let pk_param = metadata
        .columns
        .iter()
        .zip(&params)
        .find(|(c, _)| c.name == pk)
        .map_or_else(|| placeholder_name(pk), |(_, p)| p.clone());

    EndpointDescriptor::new(
        HttpMethod::Put,
        item_path(&metadata.name, &pk_param),
        format!("Update a record in {} table", metadata.name),
        format!(
            "UPDATE {} SET {} WHERE {} = :{}",
            quote_identifier(&metadata.name),
            assignments,
            quote_identifier(pk),
            pk_param
        ),
    )
    .with_parameters(column_parameters(&metadata.columns, &params))
}

/// CRUD descriptors for one table, in list, get, delete, create, update order.
/// Tables without a primary key get only list and create.
pub fn table_endpoints(metadata: &TableMetadata) -> Vec<EndpointDescriptor> {
    let table = metadata.name.as_str();
    let pk = metadata.primary_key().map(|c| c.name.as_str());

    let mut endpoints = vec![list_endpoint(table)];
    if let Some(pk) = pk {
        endpoints.push(get_endpoint(table, pk));
        endpoints.push(delete_endpoint(table, pk));
    }
    endpoints.push(create_endpoint(metadata));
    if let Some(pk) = pk {
        endpoints.push(update_endpoint(metadata, pk));
    }
    endpoints
}

/// The fixed metadata descriptors. Their empty query routes them to built-in handlers.
pub fn metadata_endpoints() -> Vec<EndpointDescriptor> {
    vec![
        EndpointDescriptor::new(HttpMethod::Get, "/tables", "List all available tables", ""),
        EndpointDescriptor::new(
            HttpMethod::Get,
            "/tables/:tableName",
            "Get metadata for a specific table",
            "",
        )
        .with_parameter("tableName", "Name of the table"),
        EndpointDescriptor::new(HttpMethod::Post, "/query", "Execute a custom SQL query", "")
            .with_parameter("query", "SQL query to execute")
            .with_parameter("params", "Parameters for the query"),
    ]
}

fn item_path(table: &str, param: &str) -> String {
    format!("/{}/:{}", table, param)
}

/// The placeholder used for `column`. Names the scanner would cut short are
/// rewritten: other characters become `_`, and a leading `_` is added when the
/// name does not start with a letter.
pub fn placeholder_name(column: &str) -> String {
    if is_placeholder_name(column) {
        return column.to_string();
    }
    let mut name: String = column
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

/// One distinct placeholder per column, in column order. Rewritten names that
/// collide get a numeric suffix.
fn placeholder_names(columns: &[Column]) -> Vec<String> {
    let mut taken: HashSet<String> = columns
        .iter()
        .filter(|c| is_placeholder_name(&c.name))
        .map(|c| c.name.clone())
        .collect();

    columns
        .iter()
        .map(|c| {
            if is_placeholder_name(&c.name) {
                return c.name.clone();
            }
            let base = placeholder_name(&c.name);
            let mut name = base.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

/// Document each column under its placeholder with its stored comment, falling
/// back to its name.
fn column_parameters(columns: &[Column], params: &[String]) -> BTreeMap<String, String> {
    columns
        .iter()
        .zip(params)
        .map(|(c, p)| {
            let mut description = if c.description.is_empty() {
                c.name.clone()
            } else {
                c.description.clone()
            };
            if *p != c.name {
                description.push_str(&format!(" (column \"{}\")", c.name));
            }
            (p.clone(), description)
        })
        .collect()
}
