//! Implements the `Sheet` trait using the `sheets::Client` to interact with a Google sheet.
//!
//! Cell values go through the `sheets` client. Structural changes (adding a tab, deleting a row)
//! need the numeric sheet id and the `spreadsheets:batchUpdate` endpoint, which we call with
//! `reqwest` directly.

use crate::api::{Sheet, TokenProvider};
use crate::error::Res;
use anyhow::{bail, Context};
use serde::Deserialize;
use sheets::types::{
    BatchUpdateValuesRequest, DateTimeRenderOption, Dimension, ValueInputOption, ValueRange,
    ValueRenderOption,
};
use sheets::ClientError;
use std::collections::HashMap;
use tracing::trace;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Implements the `Sheet` trait using the `sheets::Client` to interact with a Google sheet. It
/// takes a `TokenProvider`, on which it calls refresh to keep the token up-to-date.
pub(super) struct GoogleSheet {
    spreadsheet_id: String,
    token_provider: TokenProvider,
    client: sheets::Client,
    http: reqwest::Client,
    /// Tab title to numeric sheet id, filled on demand.
    sheet_ids: HashMap<String, i64>,
}

impl GoogleSheet {
    pub(super) async fn new(
        spreadsheet_id: impl Into<String>,
        mut token_provider: TokenProvider,
    ) -> Res<Self> {
        let client = create_sheets_client(&mut token_provider).await?;
        Ok(Self {
            spreadsheet_id: spreadsheet_id.into(),
            token_provider,
            client,
            http: reqwest::Client::new(),
            sheet_ids: HashMap::new(),
        })
    }

    /// Refreshes the sheets client with a new access token if needed
    async fn refresh_client(&mut self) -> Res<()> {
        self.client = create_sheets_client(&mut self.token_provider).await?;
        Ok(())
    }

    async fn fetch_sheet_properties(&mut self) -> Res<Vec<SheetProperties>> {
        self.refresh_client().await?;
        let url = format!(
            "{SHEETS_API}/{}?fields=sheets.properties(sheetId,title)",
            self.spreadsheet_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token_provider.token())
            .send()
            .await
            .context("Failed to send spreadsheet metadata request")?;
        let response = check_status(response, "spreadsheet metadata").await?;
        let metadata: SpreadsheetMetadata = response
            .json()
            .await
            .context("Failed to parse spreadsheet metadata")?;

        let properties: Vec<SheetProperties> =
            metadata.sheets.into_iter().map(|s| s.properties).collect();
        self.sheet_ids = properties
            .iter()
            .map(|p| (p.title.clone(), p.sheet_id))
            .collect();
        Ok(properties)
    }

    async fn sheet_id(&mut self, sheet_name: &str) -> Res<i64> {
        if !self.sheet_ids.contains_key(sheet_name) {
            self.fetch_sheet_properties().await?;
        }
        self.sheet_ids
            .get(sheet_name)
            .copied()
            .with_context(|| format!("Sheet '{sheet_name}' not found"))
    }

    async fn batch_update(&mut self, requests: serde_json::Value) -> Res<()> {
        self.refresh_client().await?;
        let url = format!("{SHEETS_API}/{}:batchUpdate", self.spreadsheet_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token_provider.token())
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await
            .context("Failed to send batchUpdate request")?;
        check_status(response, "batchUpdate").await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sheet for GoogleSheet {
    async fn sheet_names(&mut self) -> Res<Vec<String>> {
        trace!("sheet_names");
        Ok(self
            .fetch_sheet_properties()
            .await?
            .into_iter()
            .map(|p| p.title)
            .collect())
    }

    async fn add_sheet(&mut self, sheet_name: &str) -> Res<()> {
        trace!("add_sheet {sheet_name}");
        self.batch_update(serde_json::json!([
            { "addSheet": { "properties": { "title": sheet_name } } }
        ]))
        .await
        .with_context(|| format!("Failed to add sheet '{sheet_name}'"))?;
        // The new id is picked up on the next lookup.
        self.sheet_ids.clear();
        Ok(())
    }

    async fn get(&mut self, sheet_name: &str) -> Res<Vec<Vec<String>>> {
        trace!("get for {sheet_name}");
        self.refresh_client().await?;
        let range = format!("{}!A:ZZ", quote_sheet_name(sheet_name));
        let response = self
            .client
            .spreadsheets()
            .values_get(
                &self.spreadsheet_id,
                &range,
                DateTimeRenderOption::FormattedString,
                Dimension::Rows,
                ValueRenderOption::FormattedValue,
            )
            .await
            .map_err(map_client_error)
            .with_context(|| format!("Failed to fetch {sheet_name} sheet data"))?;
        Ok(response.body.values)
    }

    async fn append_rows(&mut self, sheet_name: &str, rows: &[Vec<String>]) -> Res<()> {
        let existing = self.get(sheet_name).await?.len();
        self.update_range(sheet_name, existing + 1, rows).await
    }

    async fn update_range(
        &mut self,
        sheet_name: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Res<()> {
        trace!("update_range for {sheet_name} at row {start_row}");
        if rows.is_empty() {
            return Ok(());
        }
        let range = a1_range(sheet_name, start_row, rows)?;
        self.refresh_client().await?;
        let request = BatchUpdateValuesRequest {
            data: vec![ValueRange {
                major_dimension: Some(Dimension::Rows),
                range,
                values: rows.to_vec(),
            }],
            include_values_in_response: Some(false),
            response_date_time_render_option: None,
            response_value_render_option: None,
            value_input_option: Some(ValueInputOption::UserEntered),
        };
        self.client
            .spreadsheets()
            .values_batch_update(&self.spreadsheet_id, &request)
            .await
            .map_err(map_client_error)
            .with_context(|| format!("Failed to write rows to {sheet_name}"))?;
        Ok(())
    }

    async fn delete_row(&mut self, sheet_name: &str, row: usize) -> Res<()> {
        trace!("delete_row {row} from {sheet_name}");
        if row == 0 {
            bail!("Row numbers start at 1");
        }
        let sheet_id = self.sheet_id(sheet_name).await?;
        self.batch_update(serde_json::json!([{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": row - 1,
                    "endIndex": row
                }
            }
        }]))
        .await
        .with_context(|| format!("Failed to delete row {row} from {sheet_name}"))
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

async fn check_status(response: reqwest::Response, what: &str) -> Res<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read response body".to_string());
    bail!("Google Sheets API {what} failed with status {status}: {body}")
}

/// Quotes a tab title for use in an A1 range. Single quotes inside the title are doubled.
fn quote_sheet_name(sheet_name: &str) -> String {
    format!("'{}'", sheet_name.replace('\'', "''"))
}

/// Converts a 1-based column number to letters: 1 is `A`, 27 is `AA`.
fn column_letter(mut column: usize) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// The A1 range that `rows` cover when written at column A of `start_row`.
fn a1_range(sheet_name: &str, start_row: usize, rows: &[Vec<String>]) -> Res<String> {
    if start_row == 0 {
        bail!("Row numbers start at 1");
    }
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0).max(1);
    let end_row = start_row + rows.len().max(1) - 1;
    Ok(format!(
        "{}!A{start_row}:{}{end_row}",
        quote_sheet_name(sheet_name),
        column_letter(width)
    ))
}

/// Creates a new sheets client with a refreshed access token.
async fn create_sheets_client(token_provider: &mut TokenProvider) -> Res<sheets::Client> {
    let access_token = token_provider.token_with_refresh().await?;

    // The sheets crate wants OAuth client details, but only the access token is used for calls.
    Ok(sheets::Client::new(
        String::new(),
        String::new(),
        String::new(),
        access_token,
        String::new(),
    ))
}

fn map_client_error(e: ClientError) -> anyhow::Error {
    let error_name = match &e {
        ClientError::EmptyRefreshToken => "EmptyRefreshToken".to_string(),
        ClientError::FromUtf8Error(inner) => format!("FromUtf8Error {inner}"),
        ClientError::UrlParserError(inner) => format!("UrlParserError {inner}"),
        ClientError::SerdeJsonError(inner) => format!("SerdeJsonError {inner}"),
        ClientError::ReqwestError(inner) => format!("ReqwestError {inner}"),
        ClientError::InvalidHeaderValue(inner) => format!("InvalidHeaderValue {inner}"),
        ClientError::ReqwestMiddleWareError(inner) => format!("ReqwestMiddleWareError {inner}"),
        ClientError::HttpError { .. } => "HttpError".to_string(),
        ClientError::Other(_) => "Other".to_string(),
    };
    anyhow::Error::new(e).context(error_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(6), "F");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(702), "ZZ");
    }

    #[test]
    fn test_a1_range() {
        let rows = vec![
            vec!["1".to_string(), "2025-01-05".to_string()],
            vec!["2".to_string(); 6],
        ];
        assert_eq!(a1_range("January", 2, &rows).unwrap(), "'January'!A2:F3");
        assert_eq!(
            a1_range("Março", 1, &[vec!["x".into()]]).unwrap(),
            "'Março'!A1:A1"
        );
        assert!(a1_range("S", 0, &rows).is_err());
    }

    #[test]
    fn test_quote_sheet_name() {
        assert_eq!(quote_sheet_name("Bob's"), "'Bob''s'");
    }

    #[test]
    fn test_metadata_parsing() {
        let json = r#"{"sheets":[{"properties":{"sheetId":0,"title":"January"}},
            {"properties":{"sheetId":1234,"title":"Summary"}}]}"#;
        let metadata: SpreadsheetMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.sheets.len(), 2);
        assert_eq!(metadata.sheets[1].properties.sheet_id, 1234);
        assert_eq!(metadata.sheets[1].properties.title, "Summary");
    }
}
