use rust_decimal::Decimal;
use serde::Serialize;
use smartorder_core::CatalogProduct;

use crate::validate::KnownCustomer;

#[derive(Serialize)]
struct PromptProduct<'a> {
    articul: &'a str,
    name: &'a str,
    price: Decimal,
    stock: i32,
}

/// Pretty JSON of the first `limit` catalog entries.
pub fn format_catalog(products: &[CatalogProduct], limit: usize) -> String {
    let entries: Vec<PromptProduct<'_>> = products
        .iter()
        .take(limit)
        .map(|product| PromptProduct {
            articul: &product.articul,
            name: &product.name,
            price: product.price,
            stock: product.stock,
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
}

pub fn build_prompt(catalog_json: &str, customer_message: &str, known: &KnownCustomer) -> String {
    let mut known_data = String::new();
    if known.name.is_some() || known.phone.is_some() {
        known_data.push_str("\n\nИзвестные данные клиента: ");
        if let Some(name) = &known.name {
            known_data.push_str(&format!("Имя: {name}. "));
        }
        if let Some(phone) = &known.phone {
            known_data.push_str(&format!("Телефон: {phone}. "));
        }
        known_data.push_str("Используй эти данные, если они не указаны в сообщении.");
    }

    format!(
        r#"Извлеки информацию о заказе из сообщения клиента.

Каталог товаров:
{catalog_json}

Сообщение клиента:
{customer_message}{known_data}

Задача:
1. Найди товары в каталоге по названию или артикулу (формат ФР-XXXXXXXX)
2. Извлеки количество каждого товара (по умолчанию 1)
3. Извлеки контакты: имя, телефон, адрес доставки

Верни только JSON:
{{
  "products": [
    {{
      "articul": "ФР-00000001",
      "name": "Название из каталога",
      "quantity": 2,
      "price_mentioned": 50000.0
    }}
  ],
  "customer": {{
    "name": "Иван Иванов",
    "phone": "+79991234567",
    "address": "г. Москва, ул. Ленина, д. 1, кв. 10"
  }},
  "missing_data": ["name", "phone", "address"],
  "unfound_products": ["Название товара"]
}}

Правила:
- Используй точные артикулы и названия из каталога
- Если товар не найден - добавь в unfound_products
- Если данные известны из авторизации - не добавляй в missing_data
- АДРЕС: должен содержать улицу и номер дома. Если указан только город/регион без улицы и дома - добавь "address" в missing_data и установи address: null
- Пример полного адреса: "г. Москва, ул. Ленина, д. 15, кв. 76"
- Пример неполного адреса (только город): "г. Иркутск" → address: null + "address" в missing_data
"#
    )
}
