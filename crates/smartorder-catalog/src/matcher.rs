//! Deterministic product matching used when structured parsing is not
//! available: articul lookup, fuzzy name similarity and quantity hints.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use smartorder_core::CatalogProduct;

pub const MATCH_THRESHOLD: f64 = 0.5;
const CANDIDATES_PER_TOKEN: usize = 3;
/// Words after which a number is part of an address, not a quantity.
const ADDRESS_MARKERS: [&str; 9] = ["д", "д.", "дом", "кв", "кв.", "корп", "корп.", "стр", "стр."];

static ARTICUL: LazyLock<Regex> = LazyLock::new(|| build(r"(?i)ФР-?\s*(\d{8})"));
static WORD: LazyLock<Regex> = LazyLock::new(|| build(r"\b[А-Яа-яЁёA-Za-z]{3,}\b"));
static NUMBER_BEFORE: LazyLock<Regex> = LazyLock::new(|| build(r"(?:^|[\s,;:(])(\d{1,4})\s*$"));
static NUMBER_AFTER: LazyLock<Regex> = LazyLock::new(|| build(r"(?i)^\s*(\d+)\s*(?:шт|штук|ед)"));
static UNIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(\d+)\s*(?:шт|штук|шт\.|x|\*|×)",
        r"(?i)(?:шт|штук|шт\.|x|\*|×)\s*(\d+)",
        r"(?i)количество[:\s]+(\d+)",
        r"(?i)кол-во[:\s]+(\d+)",
        r"(?i)(\d+)\s*(?:единиц|ед\.)",
    ]
    .into_iter()
    .map(build)
    .collect()
});

fn build(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid built-in pattern")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMatch {
    pub product: CatalogProduct,
    pub relevance: f64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub stock: i32,
    pub message: Option<String>,
}

pub fn find_by_articul<'a>(articul: &str, catalog: &'a [CatalogProduct]) -> Option<&'a CatalogProduct> {
    catalog.iter().find(|product| product.matches_articul(articul))
}

/// Articul codes written as `ФР-12345678` (dash and spacing optional),
/// normalized and in order of appearance.
pub fn extract_articuls(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for captures in ARTICUL.captures_iter(text) {
        let articul = format!("ФР-{}", &captures[1]);
        if !found.contains(&articul) {
            found.push(articul);
        }
    }
    found
}

/// Similarity in `0.0..=1.0`, case-insensitive. Strings of similar length
/// are compared whole; a short query against a long name is compared
/// against the best-aligned window of the name, discounted by how much
/// shorter it is.
pub fn similarity(query: &str, candidate: &str) -> f64 {
    let a: Vec<char> = query.to_lowercase().chars().collect();
    let b: Vec<char> = candidate.to_lowercase().chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let full = ratio(&a, &b);
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    let length_ratio = long.len() as f64 / short.len() as f64;
    if length_ratio < 1.5 {
        return full;
    }

    let scale = if length_ratio < 8.0 { 0.9 } else { 0.6 };
    full.max(partial_ratio(short, long) * scale)
}

fn ratio(a: &[char], b: &[char]) -> f64 {
    2.0 * lcs_len(a, b) as f64 / (a.len() + b.len()) as f64
}

fn partial_ratio(short: &[char], long: &[char]) -> f64 {
    long.windows(short.len())
        .map(|window| ratio(short, window))
        .fold(0.0, f64::max)
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &left in a {
        for (j, &right) in b.iter().enumerate() {
            current[j + 1] = if left == right {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

struct Token {
    text: String,
    start: usize,
    end: usize,
    pair: bool,
}

/// Words of three or more letters plus each pair of neighbouring words.
fn tokens(text: &str) -> Vec<Token> {
    let words: Vec<_> = WORD.find_iter(text).collect();
    let mut tokens: Vec<Token> = words
        .iter()
        .map(|word| Token {
            text: word.as_str().to_string(),
            start: word.start(),
            end: word.end(),
            pair: false,
        })
        .collect();

    for pair in words.windows(2) {
        tokens.push(Token {
            text: format!("{} {}", pair[0].as_str(), pair[1].as_str()),
            start: pair[0].start(),
            end: pair[1].end(),
            pair: true,
        });
    }
    tokens.sort_by_key(|token| token.start);
    tokens
}

/// A bare number right before `start`. Digits of an articul and house or
/// flat numbers are not quantities.
fn number_before(text: &str, start: usize, articuls: &[(usize, usize)]) -> Option<i32> {
    let number = NUMBER_BEFORE.captures(&text[..start])?.get(1)?;
    if articuls.iter().any(|&(from, to)| number.start() < to && number.end() > from) {
        return None;
    }

    let prefix = text[..number.start()].trim_end().to_lowercase();
    let last_word = prefix
        .rsplit(|ch: char| ch.is_whitespace() || ch == ',')
        .next()
        .unwrap_or_default();
    if ADDRESS_MARKERS.contains(&last_word) {
        return None;
    }
    number.as_str().parse().ok()
}

/// Quantity written right next to a matched span: a bare number before it,
/// or a number with a unit after it.
fn local_quantity(text: &str, start: usize, end: usize, articuls: &[(usize, usize)]) -> Option<i32> {
    let after = || {
        NUMBER_AFTER
            .captures(&text[end..])
            .and_then(|captures| captures[1].parse::<i32>().ok())
    };
    number_before(text, start, articuls)
        .filter(|qty| *qty > 0)
        .or_else(|| after().filter(|qty| *qty > 0))
}

fn unit_quantity(text: &str) -> Option<i32> {
    UNIT_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|captures| captures[1].parse::<i32>().ok())
            .filter(|qty| *qty > 0)
    })
}

struct Candidate {
    product: CatalogProduct,
    relevance: f64,
    quantity: Option<i32>,
    seen: usize,
}

/// Finds catalog products mentioned in free text, best match first.
///
/// Explicit articuls score 1.0. Otherwise every token is compared with
/// every product name; matches at or above the threshold are kept, one
/// per articul with its best score. Ties keep catalog order.
pub fn match_products(text: &str, catalog: &[CatalogProduct], limit: usize) -> Vec<ProductMatch> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut record = |product: &CatalogProduct, relevance: f64, quantity: Option<i32>, seen: usize| {
        match index.get(&product.articul) {
            Some(&slot) => {
                let candidate = &mut candidates[slot];
                if relevance > candidate.relevance {
                    candidate.relevance = relevance;
                }
                if candidate.quantity.is_none() {
                    candidate.quantity = quantity;
                }
            }
            None => {
                index.insert(product.articul.clone(), candidates.len());
                candidates.push(Candidate {
                    product: product.clone(),
                    relevance,
                    quantity,
                    seen,
                });
            }
        }
    };

    let articul_spans: Vec<(usize, usize)> = ARTICUL
        .find_iter(text)
        .map(|span| (span.start(), span.end()))
        .collect();

    for captures in ARTICUL.captures_iter(text) {
        let Some(span) = captures.get(0) else { continue };
        let articul = format!("ФР-{}", &captures[1]);
        if let Some(position) = catalog.iter().position(|product| product.matches_articul(&articul)) {
            let quantity = local_quantity(text, span.start(), span.end(), &articul_spans);
            record(&catalog[position], 1.0, quantity, position);
        }
    }

    for token in tokens(text) {
        let mut scored: Vec<(usize, f64)> = catalog
            .iter()
            .enumerate()
            .map(|(position, product)| (position, similarity(&token.text, &product.name)))
            .filter(|(_, score)| *score >= MATCH_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        // A pair may start with a word that is not part of the product name,
        // so only the number after it counts.
        let quantity = if token.pair {
            NUMBER_AFTER
                .captures(&text[token.end..])
                .and_then(|captures| captures[1].parse::<i32>().ok())
                .filter(|qty| *qty > 0)
        } else {
            local_quantity(text, token.start, token.end, &articul_spans)
        };
        for (position, score) in scored.into_iter().take(CANDIDATES_PER_TOKEN) {
            record(&catalog[position], score, quantity, position);
        }
    }

    let fallback_quantity = unit_quantity(text).unwrap_or(1);
    candidates.sort_by(|a, b| b.relevance.total_cmp(&a.relevance).then(a.seen.cmp(&b.seen)));
    candidates
        .into_iter()
        .take(limit)
        .map(|candidate| ProductMatch {
            quantity: candidate.quantity.unwrap_or(fallback_quantity),
            product: candidate.product,
            relevance: candidate.relevance,
        })
        .collect()
}

pub fn check_availability(product: &CatalogProduct, requested: i32) -> Availability {
    let available = product.stock >= requested;
    let message = match (available, product.stock) {
        (true, _) => None,
        (false, 0) => Some("Товар отсутствует на складе".to_string()),
        (false, stock) => Some(format!("В наличии только {stock} шт., запрошено {requested} шт.")),
    };
    Availability {
        available,
        stock: product.stock,
        message,
    }
}
