//! PostgREST (Supabase) table client.

use std::collections::BTreeSet;

use super::{RemoteError, RemotePayload, RemoteRow};
use crate::pipeline::reconcile::traits::RemoteSink;

/// Blocking client for one table behind a PostgREST endpoint.
pub struct PostgrestSink {
    base_url: String,
    api_key: String,
    table: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl PostgrestSink {
    /// `base_url` is the project URL; `/rest/v1/<table>` is appended.
    pub fn new(
        base_url: &str,
        api_key: &str,
        table: &str,
        timeout_secs: u64,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RemoteError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            table: table.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorized(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn send(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, RemoteError> {
        let response = self.authorized(builder).send().map_err(|e| {
            if e.is_connect() {
                RemoteError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                RemoteError::Timeout(self.timeout_secs)
            } else {
                RemoteError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// `eq.<id>` filter value.
fn eq_filter(id: &str) -> String {
    format!("eq.{id}")
}

/// `in.("a","b")` filter value. Ids are quoted so commas and parentheses
/// inside an id cannot break the list.
fn in_filter(ids: &BTreeSet<String>) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

fn order_param(column: &str) -> String {
    format!("{column}.desc")
}

impl RemoteSink for PostgrestSink {
    fn insert(&self, payload: &RemotePayload) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=minimal")
            .json(&[payload]);
        self.send(request)?;
        tracing::debug!(table = %self.table, columns = payload.len(), "Row inserted");
        Ok(())
    }

    fn update(&self, remote_id: &str, payload: &RemotePayload) -> Result<(), RemoteError> {
        let mut body = payload.clone();
        body.remove("id");
        let request = self
            .client
            .patch(self.table_url())
            .query(&[("id", eq_filter(remote_id))])
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send(request)?;
        Ok(())
    }

    fn delete(&self, remote_ids: &BTreeSet<String>) -> Result<(), RemoteError> {
        if remote_ids.is_empty() {
            return Ok(());
        }
        let request = self
            .client
            .delete(self.table_url())
            .query(&[("id", in_filter(remote_ids))]);
        self.send(request)?;
        tracing::info!(table = %self.table, rows = remote_ids.len(), "Rows deleted");
        Ok(())
    }

    fn select_all(&self, order_column: &str) -> Result<Vec<RemoteRow>, RemoteError> {
        let request = self
            .client
            .get(self.table_url())
            .query(&[("select", "*".to_string()), ("order", order_param(order_column))]);
        let response = self.send(request)?;

        let rows: Vec<serde_json::Value> = response
            .json()
            .map_err(|e| RemoteError::ResponseParsing(e.to_string()))?;
        rows.into_iter().map(RemoteRow::from_json).collect()
    }
}
