//! Raw authenticated API access.

use super::{open_session, parse_query, Context};
use crate::output::{self, OutputFormat};
use anyhow::Result;
use console_auth::HttpRequest;
use serde_json::Value;

/// GET `path` through the authenticated pipeline and print the result.
pub async fn get(ctx: &Context, path: &str, query: &[String]) -> Result<()> {
    let manager = open_session(ctx)?;
    let request = HttpRequest::get(path).with_query(parse_query(query)?);
    let envelope = manager.client().execute::<Value>(request).await?;

    match ctx.format {
        OutputFormat::Text => {
            output::print_json(envelope.data.as_ref().unwrap_or(&Value::Null));
            if let Some(page) = &envelope.pagination {
                println!(
                    "page {}/{} ({} total)",
                    page.page, page.total_pages, page.total
                );
            }
        }
        OutputFormat::Json => output::print_json(&envelope),
    }
    Ok(())
}
