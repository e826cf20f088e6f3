use std::sync::LazyLock;

use regex::Regex;
use smartorder_catalog::match_products;
use smartorder_core::{CatalogProduct, CustomerDetails, ParsedOrderDraft, ParsedProduct};
use tracing::info;

const MAX_PRODUCTS: usize = 10;

static PHONE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\+?7\s?\(?\d{3}\)?\s?\d{3}[\s-]?\d{2}[\s-]?\d{2}",
        r"8\s?\(?\d{3}\)?\s?\d{3}[\s-]?\d{2}[\s-]?\d{2}",
        r"\d{10,11}",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid phone pattern"))
    .collect()
});

/// Address keywords in priority order. Labels (`Адрес: ...`) capture what
/// follows them; markers such as a city or street start the address.
const ADDRESS_KEYWORDS: [(&str, bool); 8] = [
    ("москва", false),
    ("санкт-петербург", false),
    ("адрес", true),
    ("доставка", true),
    ("ул.", false),
    ("улица", false),
    ("дом", false),
    ("квартира", false),
];

static ADDRESS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ADDRESS_KEYWORDS
        .iter()
        .map(|(keyword, is_label)| {
            let keyword = regex::escape(keyword);
            let pattern = if *is_label {
                format!(r"(?i)\b{keyword}[:\s]+([^\n!?]+)")
            } else {
                format!(r"(?i)(\b{keyword}[^\n!?]*)")
            };
            Regex::new(&pattern).expect("valid address pattern")
        })
        .collect()
});

/// First phone-like sequence with separators removed.
pub fn extract_phone(text: &str) -> Option<String> {
    PHONE_PATTERNS.iter().find_map(|pattern| {
        pattern.find(text).map(|found| {
            found
                .as_str()
                .chars()
                .filter(|ch| !matches!(ch, ' ' | '-' | '(' | ')'))
                .collect()
        })
    })
}

/// Keyword-anchored address capture. Phone numbers are removed first so
/// they never leak into the address.
pub fn extract_address(text: &str) -> Option<String> {
    let without_phones = PHONE_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, pattern| pattern.replace_all(&acc, " ").into_owned());

    ADDRESS_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(&without_phones)
            .and_then(|captures| captures.get(1))
            .map(|found| found.as_str().trim().trim_end_matches(['.', ',', ';', ' ']).to_string())
            .filter(|address| !address.is_empty())
    })
}

/// Deterministic draft built without the language model.
pub fn fallback_parse(text: &str, catalog: &[CatalogProduct]) -> ParsedOrderDraft {
    let products: Vec<ParsedProduct> = match_products(text, catalog, MAX_PRODUCTS)
        .into_iter()
        .map(|found| ParsedProduct {
            articul: found.product.articul,
            name: found.product.name,
            quantity: found.quantity,
            price_mentioned: None,
        })
        .collect();

    let customer = CustomerDetails {
        name: None,
        phone: extract_phone(text),
        address: extract_address(text),
    };
    let missing_data = customer.missing_fields().into_iter().map(str::to_string).collect();
    info!(products = products.len(), "fallback parser produced draft");

    ParsedOrderDraft {
        products,
        customer,
        missing_data,
        unfound_products: Vec::new(),
    }
}
