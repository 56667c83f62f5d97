//! JSON-RPC client for the ERP backend.
//!
//! Speaks the Odoo-style `/jsonrpc` protocol: one `authenticate` call on the
//! `common` service, then `search_read` calls on the `object` service for
//! each of the six models. Fetched records are normalized at ingestion:
//! nulls stripped, `[id, label]` foreign keys decomposed, and display-name
//! columns derived so downstream joins work on scalars.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::config::Config;

use super::record::{extract_id, extract_label, Record, RecordCollection, Snapshot};
use super::source::RecordSource;

/// ERP API client.
#[derive(Clone)]
pub struct ErpClient {
  http: reqwest::Client,
  endpoint: Url,
  db: String,
  username: String,
  api_key: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
  message: String,
  #[serde(default)]
  data: Option<Value>,
}

impl ErpClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;

    let endpoint = Url::parse(&config.erp.url)
      .and_then(|u| u.join("/jsonrpc"))
      .map_err(|e| eyre!("Invalid ERP url {}: {}", config.erp.url, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      endpoint,
      db: config.erp.db.clone(),
      username: config.erp.username.clone(),
      api_key,
    })
  }

  async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value> {
    let body = json!({
      "jsonrpc": "2.0",
      "method": "call",
      "params": { "service": service, "method": method, "args": args },
      "id": 1,
    });

    let response: RpcResponse = self
      .http
      .post(self.endpoint.clone())
      .json(&body)
      .send()
      .await
      .map_err(|e| eyre!("ERP request failed: {}", e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse ERP response: {}", e))?;

    if let Some(err) = response.error {
      return Err(eyre!(
        "ERP call {}.{} failed: {}{}",
        service,
        method,
        err.message,
        err
          .data
          .as_ref()
          .and_then(|d| d.get("message"))
          .and_then(Value::as_str)
          .map(|m| format!(": {}", m))
          .unwrap_or_default()
      ));
    }

    response
      .result
      .ok_or_else(|| eyre!("ERP call {}.{} returned no result", service, method))
  }

  async fn authenticate(&self) -> Result<i64> {
    let result = self
      .call(
        "common",
        "authenticate",
        json!([self.db, self.username, self.api_key, {}]),
      )
      .await?;

    result
      .as_i64()
      .ok_or_else(|| eyre!("ERP authentication rejected for user {}", self.username))
  }

  /// Run `search_read` for one model and return the raw rows with null
  /// fields stripped.
  async fn search_read(
    &self,
    uid: i64,
    model: &str,
    fields: &[&str],
    domain: &Value,
  ) -> Result<RecordCollection> {
    let result = self
      .call(
        "object",
        "execute_kw",
        json!([
          self.db,
          uid,
          self.api_key,
          model,
          "search_read",
          [domain, fields],
        ]),
      )
      .await?;

    let rows = result
      .as_array()
      .ok_or_else(|| eyre!("ERP returned non-list rows for {}", model))?;

    let records = rows
      .iter()
      .filter_map(Value::as_object)
      .map(|row| {
        Record(
          row
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        )
      })
      .collect();

    debug!("Fetched {} rows for {}", rows.len(), model);
    Ok(RecordCollection::from_records(records))
  }
}

#[async_trait]
impl RecordSource for ErpClient {
  async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Snapshot> {
    let uid = self.authenticate().await?;

    // Restrict every model to records modified after the bound, when given.
    let domain = match since {
      Some(ts) => json!([["write_date", ">", ts.format("%Y-%m-%d %H:%M:%S").to_string()]]),
      None => json!([]),
    };

    let (projects, employees, sales, financials, timesheet, tasks) = futures::try_join!(
      self.search_read(
        uid,
        "project.project",
        &["id", "name", "partner_id", "user_id", "date_start", "date", "active"],
        &domain,
      ),
      self.search_read(
        uid,
        "hr.employee",
        &["id", "name", "department_id", "job_id"],
        &domain,
      ),
      self.search_read(
        uid,
        "sale.order",
        &["name", "partner_id", "amount_total", "date_order"],
        &domain,
      ),
      self.search_read(
        uid,
        "account.move",
        &["name", "move_type", "amount_total", "date"],
        &domain,
      ),
      self.search_read(
        uid,
        "account.analytic.line",
        &["employee_id", "task_id", "project_id", "unit_amount", "date"],
        &domain,
      ),
      self.search_read(
        uid,
        "project.task",
        &["id", "project_id", "stage_id", "name", "create_date", "date_end"],
        &domain,
      ),
    )?;

    let mut snapshot = Snapshot {
      projects,
      employees,
      sales,
      financials,
      timesheet,
      tasks,
    };
    normalize(&mut snapshot);
    Ok(snapshot)
  }
}

/// Decompose composite foreign keys and derive display-name columns.
///
/// Runs once at ingestion so the rest of the system only ever sees scalar
/// ids plus `project_name` / `employee_name` / `job_title` columns.
pub fn normalize(snapshot: &mut Snapshot) {
  let project_names = id_name_map(&snapshot.projects);
  let employee_names = id_name_map(&snapshot.employees);

  for record in &mut snapshot.employees.records {
    if record.get("job_title").is_none() {
      if let Some(title) = record.get("job_id").and_then(extract_label) {
        let title = title.to_string();
        record.set("job_title", Value::String(title));
      }
    }
    scalarize(record, "job_id");
    scalarize(record, "department_id");
  }

  for record in &mut snapshot.timesheet.records {
    scalarize(record, "project_id");
    scalarize(record, "employee_id");
    scalarize(record, "task_id");
    map_name(record, "project_id", "project_name", &project_names);
    map_name(record, "employee_id", "employee_name", &employee_names);
  }

  for record in &mut snapshot.tasks.records {
    scalarize(record, "project_id");
    map_name(record, "project_id", "project_name", &project_names);
  }
}

fn id_name_map(collection: &RecordCollection) -> std::collections::HashMap<i64, String> {
  collection
    .iter()
    .filter_map(|r| Some((r.id()?, r.str_field("name")?.to_string())))
    .collect()
}

/// Replace an `[id, label]` field with its scalar id in place.
fn scalarize(record: &mut Record, field: &str) {
  if let Some(value) = record.get(field) {
    if value.is_array() {
      match extract_id(value) {
        Some(id) => record.set(field, json!(id)),
        None => {
          record.remove(field);
        }
      }
    }
  }
}

fn map_name(
  record: &mut Record,
  id_field: &str,
  name_field: &str,
  names: &std::collections::HashMap<i64, String>,
) {
  if record.get(name_field).is_some() {
    return;
  }
  if let Some(name) = record
    .get(id_field)
    .and_then(extract_id)
    .and_then(|id| names.get(&id))
  {
    let name = name.clone();
    record.set(name_field, Value::String(name));
  }
}
