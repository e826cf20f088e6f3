use std::sync::LazyLock;

use regex::Regex;
use smartorder_catalog::{check_availability, find_by_articul};
use smartorder_core::{
    CatalogProduct, CustomerDetails, DraftSource, OrderResult, ParsedOrderDraft, ResultStatus, ValidatedProduct,
};
use tracing::{info, warn};

const STREET_KEYWORDS: [&str; 16] = [
    "ул.", "улица", "пр.", "проспект", "пер.", "переулок", "бульвар", "бул.", "наб.", "набережная", "шоссе", "пл.",
    "площадь", "тракт", "аллея", "проезд",
];

static HOUSE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(д\.?\s*\d+|\d+\s*[а-яё]?)\b").expect("valid house number pattern"));

const NAME_QUESTION: &str = "Укажите, пожалуйста, ваше ФИО";
const PHONE_QUESTION: &str = "Укажите, пожалуйста, ваш номер телефона";
const ADDRESS_QUESTION: &str = "Укажите полный адрес доставки (город, улица, дом, квартира)";
const UNFOUND_QUESTION: &str = "Некоторые товары не найдены в каталоге. Пожалуйста, уточните артикулы или названия.";

/// Contact data already known from the channel, e.g. an authorized chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownCustomer {
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// An address is deliverable when it names a street or carries a house
/// number; a bare city is not.
pub fn is_address_complete(address: &str) -> bool {
    let lowered = address.to_lowercase();
    STREET_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) || HOUSE_NUMBER.is_match(&lowered)
}

fn present(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|text| !text.is_empty()).map(str::to_string)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Checks a draft against the catalog and decides whether the order can
/// be placed or needs a follow-up with the customer. Never fails.
pub fn validate_draft(
    draft: &ParsedOrderDraft,
    catalog: &[CatalogProduct],
    known: &KnownCustomer,
    source: DraftSource,
) -> OrderResult {
    let mut products = Vec::new();
    let mut unfound = Vec::new();

    for requested in &draft.products {
        let found = Some(requested.articul.trim())
            .filter(|articul| !articul.is_empty())
            .and_then(|articul| find_by_articul(articul, catalog));
        let Some(product) = found else {
            warn!(articul = %requested.articul, name = %requested.name, "product not found in catalog");
            let label = if requested.name.trim().is_empty() {
                requested.articul.trim()
            } else {
                requested.name.trim()
            };
            push_unique(&mut unfound, label.to_string());
            continue;
        };

        let availability = check_availability(product, requested.quantity);
        products.push(ValidatedProduct {
            articul: product.articul.clone(),
            name: product.name.clone(),
            quantity: requested.quantity,
            price_at_order: product.price,
            stock: availability.stock,
            available: availability.available,
            validated: availability.available,
        });
    }
    for name in &draft.unfound_products {
        if !name.trim().is_empty() {
            push_unique(&mut unfound, name.trim().to_string());
        }
    }

    let raw_address = present(draft.customer.address.as_deref());
    let incomplete_address = raw_address.as_deref().filter(|address| !is_address_complete(address));
    if let Some(address) = incomplete_address {
        info!(address, "address has no street or house number");
    }
    let customer = CustomerDetails {
        name: present(draft.customer.name.as_deref()).or_else(|| present(known.name.as_deref())),
        phone: present(draft.customer.phone.as_deref()).or_else(|| present(known.phone.as_deref())),
        address: raw_address.clone().filter(|address| is_address_complete(address)),
    };

    let mut missing_data: Vec<String> = customer.missing_fields().into_iter().map(str::to_string).collect();
    for field in &draft.missing_data {
        let field = field.trim();
        if !field.is_empty() && !matches!(field, "name" | "phone" | "address") {
            push_unique(&mut missing_data, field.to_string());
        }
    }

    let has_unavailable = products.iter().any(|product| !product.available);
    let status = if products.is_empty() || !unfound.is_empty() || !missing_data.is_empty() || has_unavailable {
        ResultStatus::NeedsClarification
    } else {
        ResultStatus::Validated
    };

    let mut questions: Vec<String> = missing_data
        .iter()
        .map(|field| match field.as_str() {
            "name" => NAME_QUESTION.to_string(),
            "phone" => PHONE_QUESTION.to_string(),
            "address" => match incomplete_address {
                Some(address) => format!(
                    "Уточните полный адрес доставки — нужны улица и номер дома.\nВы указали: «{address}»\nПример полного адреса: г. Иркутск, ул. Шукшина, д. 60, кв. 15"
                ),
                None => ADDRESS_QUESTION.to_string(),
            },
            other => format!("Уточните, пожалуйста: {other}"),
        })
        .collect();
    if !unfound.is_empty() || products.is_empty() {
        questions.push(UNFOUND_QUESTION.to_string());
    }
    for product in products.iter().filter(|product| !product.available) {
        questions.push(format!(
            "Товар «{}»: в наличии только {} шт., вы запросили {} шт. Подтвердите нужное количество.",
            product.name, product.stock, product.quantity
        ));
    }

    OrderResult {
        status,
        products,
        customer,
        missing_data,
        unfound_products: unfound,
        clarification_questions: questions,
        source,
    }
}
