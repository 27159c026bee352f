//! Canonicalization of raw upstream part payloads.
//!
//! Backends disagree on shapes: prices arrive as numbers, currency strings
//! ("$12.40"), or nested cost objects; quantities as floats or strings; ids
//! under several names. `normalize` folds all of that into a canonical
//! [`PartRecord`] and is idempotent: normalizing an already-canonical
//! record yields the same record.

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::PartRecord;

const ID_KEYS: &[&str] = &["componentId", "component_id", "id", "ref", "reference"];
const MPN_KEYS: &[&str] = &["mpn", "partNumber", "part_number"];
const MANUFACTURER_KEYS: &[&str] = &["manufacturer", "mfr", "brand"];
const DESCRIPTION_KEYS: &[&str] = &["description", "desc", "name"];
const PRICE_KEYS: &[&str] = &["price", "unitPrice", "unit_price", "cost", "pricing"];
const PRICE_SUBKEYS: &[&str] = &["value", "unit", "cost", "price", "amount"];
const QUANTITY_KEYS: &[&str] = &["quantity", "qty", "count"];
const PACKAGE_KEYS: &[&str] = &["package", "footprint"];
const INTERFACE_KEYS: &[&str] = &["interfaces", "protocols"];
const DATASHEET_KEYS: &[&str] = &["datasheet", "datasheetUrl", "datasheet_url"];
const LIFECYCLE_KEYS: &[&str] = &["lifecycle", "lifecycleStatus", "lifecycle_status"];
const AVAILABILITY_KEYS: &[&str] = &["availability", "stock", "stockStatus"];

const DEFAULT_CURRENCY: &str = "USD";

/// Coerce a raw part payload into a canonical record.
pub fn normalize(raw: &Value) -> PartRecord {
    let component_id = first_string(raw, ID_KEYS)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            let generated = format!("component-{}", Uuid::new_v4());
            warn!(fallback = %generated, "part payload had no component id; generating one");
            generated
        });

    PartRecord {
        component_id,
        mpn: first_string(raw, MPN_KEYS).unwrap_or_default(),
        manufacturer: first_string(raw, MANUFACTURER_KEYS).unwrap_or_default(),
        description: first_string(raw, DESCRIPTION_KEYS).unwrap_or_default(),
        price: extract_price(raw),
        quantity: extract_quantity(raw),
        currency: first_string(raw, &["currency"]).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        package: first_string(raw, PACKAGE_KEYS).unwrap_or_default(),
        interfaces: extract_interfaces(raw),
        datasheet: first_string(raw, DATASHEET_KEYS),
        lifecycle: first_string(raw, LIFECYCLE_KEYS),
        availability: first_string(raw, AVAILABILITY_KEYS),
    }
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match raw.get(key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Price extraction ladder: direct number, nested cost object, currency
/// string, then a logged 0.0 fallback.
fn extract_price(raw: &Value) -> f64 {
    for key in PRICE_KEYS {
        if let Some(value) = raw.get(key) {
            if let Some(price) = coerce_price(value) {
                return price;
            }
        }
    }
    warn!("part payload had no usable price; defaulting to 0.0");
    0.0
}

fn coerce_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(clamp_price),
        Value::String(s) => parse_price_string(s),
        Value::Object(map) => {
            for key in PRICE_SUBKEYS {
                if let Some(inner) = map.get(*key) {
                    if let Some(price) = coerce_price(inner) {
                        return Some(price);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Strip currency symbols, separators, and whitespace before parsing.
fn parse_price_string(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().map(clamp_price)
}

/// Prices are finite and non-negative after normalization.
fn clamp_price(price: f64) -> f64 {
    if price.is_finite() && price >= 0.0 {
        price
    } else {
        warn!(price, "clamping non-canonical price to 0.0");
        0.0
    }
}

/// Quantities are floored integers with a minimum of 1.
fn extract_quantity(raw: &Value) -> u32 {
    for key in QUANTITY_KEYS {
        match raw.get(key) {
            Some(Value::Number(n)) => {
                if let Some(q) = n.as_f64() {
                    return floor_quantity(q);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(q) = s.trim().parse::<f64>() {
                    return floor_quantity(q);
                }
            }
            _ => {}
        }
    }
    1
}

fn floor_quantity(q: f64) -> u32 {
    if q.is_finite() && q >= 1.0 {
        q.floor() as u32
    } else {
        1
    }
}

fn extract_interfaces(raw: &Value) -> Vec<String> {
    for key in INTERFACE_KEYS {
        if let Some(Value::Array(items)) = raw.get(key) {
            return items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_number_price() {
        let part = normalize(&json!({"componentId": "U1", "price": 12.4}));
        assert_eq!(part.price, 12.4);
    }

    #[test]
    fn test_currency_string_price() {
        let part = normalize(&json!({"componentId": "U1", "price": "$1,234.50"}));
        assert_eq!(part.price, 1234.5);
        let part = normalize(&json!({"componentId": "U1", "price": " €0.07 "}));
        assert_eq!(part.price, 0.07);
    }

    #[test]
    fn test_nested_cost_object_price() {
        let part = normalize(&json!({"componentId": "U1", "price": {"value": 3.3}}));
        assert_eq!(part.price, 3.3);
        let part = normalize(&json!({"componentId": "U1", "cost": {"unit": "2.25"}}));
        assert_eq!(part.price, 2.25);
        // Nested one level deeper still resolves.
        let part = normalize(&json!({"componentId": "U1", "pricing": {"unit": {"amount": 5}}}));
        assert_eq!(part.price, 5.0);
    }

    #[test]
    fn test_missing_or_garbage_price_falls_back_to_zero() {
        assert_eq!(normalize(&json!({"componentId": "U1"})).price, 0.0);
        assert_eq!(normalize(&json!({"componentId": "U1", "price": null})).price, 0.0);
        assert_eq!(
            normalize(&json!({"componentId": "U1", "price": "call us"})).price,
            0.0
        );
        assert_eq!(
            normalize(&json!({"componentId": "U1", "price": -4.2})).price,
            0.0
        );
    }

    #[test]
    fn test_quantity_floor_and_minimum() {
        assert_eq!(normalize(&json!({"componentId": "U1", "quantity": 3.9})).quantity, 3);
        assert_eq!(normalize(&json!({"componentId": "U1", "quantity": "2"})).quantity, 2);
        assert_eq!(normalize(&json!({"componentId": "U1", "quantity": 0})).quantity, 1);
        assert_eq!(normalize(&json!({"componentId": "U1", "quantity": -5})).quantity, 1);
        assert_eq!(normalize(&json!({"componentId": "U1"})).quantity, 1);
        assert_eq!(
            normalize(&json!({"componentId": "U1", "quantity": "lots"})).quantity,
            1
        );
    }

    #[test]
    fn test_component_id_never_empty() {
        let part = normalize(&json!({"mpn": "STM32F405"}));
        assert!(!part.component_id.is_empty());
        assert!(part.component_id.starts_with("component-"));

        let part = normalize(&json!({"componentId": "", "id": "U7"}));
        assert!(!part.component_id.is_empty());
    }

    #[test]
    fn test_alternate_field_names() {
        let part = normalize(&json!({
            "id": "U1",
            "partNumber": "LM317",
            "mfr": "TI",
            "desc": "adjustable regulator",
            "footprint": "TO-220",
            "protocols": ["I2C", "SPI"],
            "datasheetUrl": "https://example.com/lm317.pdf",
            "stock": "in stock"
        }));
        assert_eq!(part.mpn, "LM317");
        assert_eq!(part.manufacturer, "TI");
        assert_eq!(part.description, "adjustable regulator");
        assert_eq!(part.package, "TO-220");
        assert_eq!(part.interfaces, vec!["I2C", "SPI"]);
        assert_eq!(part.datasheet.as_deref(), Some("https://example.com/lm317.pdf"));
        assert_eq!(part.availability.as_deref(), Some("in stock"));
    }

    fn assert_idempotent(raw: Value) {
        let once = normalize(&raw);
        let round_tripped = serde_json::to_value(&once).unwrap();
        let twice = normalize(&round_tripped);
        assert_eq!(once, twice, "normalize must be idempotent for {raw}");
    }

    #[test]
    fn test_idempotence_across_malformed_shapes() {
        assert_idempotent(json!({"componentId": "U1", "price": 12.4, "quantity": 2}));
        assert_idempotent(json!({"componentId": "U1", "price": "$1,234.50"}));
        assert_idempotent(json!({"componentId": "U1", "price": {"value": 3.3}}));
        assert_idempotent(json!({"componentId": "U1", "price": null}));
        assert_idempotent(json!({"componentId": "U1"}));
        assert_idempotent(json!({
            "componentId": "U1",
            "mpn": "LM317",
            "manufacturer": "TI",
            "currency": "EUR",
            "interfaces": ["I2C"],
            "lifecycle": "active"
        }));
    }
}
