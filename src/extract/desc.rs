// src/extract/desc.rs

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::text::{extract_date, slugify};

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("row selector is valid"));
static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td, th").expect("cell selector is valid"));

/// Attribute key whose value carries the last-event date.
const LAST_EVENT_KEY: &str = "ultimo_evento";

/// Attributes parsed out of one description table.
#[derive(Debug, Default, PartialEq)]
pub struct DescriptionTable {
    /// Slugified label → trimmed value.
    pub attributes: BTreeMap<String, String>,
    /// `YYYY/MM/DD` from the last-event row; empty when absent.
    pub modified: String,
}

/// Scan the description's table rows for label/value pairs.
///
/// The source table opens with two header rows, which are skipped no
/// matter what they contain. In each data row the second cell is the
/// label and the last non-empty remaining cell is the value.
pub fn parse_description(html: &str) -> DescriptionTable {
    let fragment = Html::parse_fragment(html);
    let mut table = DescriptionTable::default();

    for (i, row) in fragment.select(&ROW_SELECTOR).enumerate() {
        if i < 2 {
            continue;
        }

        let mut label = String::new();
        let mut value = String::new();
        for (j, cell) in row.select(&CELL_SELECTOR).enumerate() {
            let text = cell_text(&cell);
            if text.is_empty() {
                continue;
            }
            if j == 1 {
                label = text;
            } else {
                value = text;
            }
        }

        if label.is_empty() {
            continue;
        }
        let slug = slugify(&label);
        if slug == LAST_EVENT_KEY {
            table.modified = extract_date(&value);
        }
        table.attributes.insert(slug, value);
    }

    table
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}
