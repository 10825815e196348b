//! Field formatters for human-readable output

use clap::ValueEnum;
use emv_common::{tags, Tag};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Human-readable formatted output
    Human,
    /// Raw hex output
    Raw,
    /// JSON documents on stdout
    Json,
}

impl FormatMode {
    pub fn description(&self) -> &'static str {
        match self {
            FormatMode::Human => "Human-Readable",
            FormatMode::Raw => "Raw",
            FormatMode::Json => "JSON",
        }
    }
}

/// Format a field value based on its tag
pub fn format_value(tag: Tag, value: &[u8], mode: FormatMode) -> String {
    if mode != FormatMode::Human {
        return hex::encode_upper(value);
    }

    match tag {
        // ASCII text
        tags::APPLICATION_LABEL
        | tags::APPLICATION_PREFERRED_NAME
        | tags::LANGUAGE_PREFERENCE
        | tags::PAYMENT_ACCOUNT_REFERENCE => String::from_utf8(value.to_vec())
            .unwrap_or_else(|_| hex::encode_upper(value)),

        tags::CARDHOLDER_NAME => String::from_utf8(value.to_vec())
            .unwrap_or_else(|_| hex::encode_upper(value))
            .trim()
            .to_string(),

        // YYMMDD
        tags::APPLICATION_EXPIRATION_DATE if value.len() == 3 => {
            format!("20{:02X}/{:02X} (Year/Month)", value[0], value[1])
        }
        tags::APPLICATION_EFFECTIVE_DATE | tags::TRANSACTION_DATE if value.len() == 3 => {
            format!(
                "20{:02X}/{:02X}/{:02X} (YY/MM/DD)",
                value[0], value[1], value[2]
            )
        }

        // ISO 3166-1 numeric, BCD
        tags::ISSUER_COUNTRY_CODE | tags::TERMINAL_COUNTRY_CODE if value.len() == 2 => {
            let code = bcd_number(value);
            match get_country_name(code) {
                Some(country) => format!("{code} ({country})"),
                None => format!("{code}"),
            }
        }

        // ISO 4217 numeric, BCD
        tags::TRANSACTION_CURRENCY_CODE if value.len() == 2 => {
            let code = bcd_number(value);
            match get_currency_name(code) {
                Some(currency) => currency.to_string(),
                None => format!("Currency Code {code}"),
            }
        }

        tags::AMOUNT_AUTHORISED | tags::AMOUNT_OTHER if value.len() == 6 => {
            let minor = bcd_number(value);
            format!("{}.{:02}", minor / 100, minor % 100)
        }

        tags::APPLICATION_PAN_SEQUENCE_NUMBER | tags::APPLICATION_PRIORITY_INDICATOR
            if value.len() == 1 =>
        {
            format!("{}", value[0] & 0x0F)
        }

        tags::APPLICATION_TRANSACTION_COUNTER if value.len() == 2 => {
            format!("{}", u16::from_be_bytes([value[0], value[1]]))
        }

        tags::KERNEL_IDENTIFIER if !value.is_empty() => {
            emv_card::KernelId::from_byte(value[0]).name()
        }

        tags::FORM_FACTOR_INDICATOR if value.len() == 4 => {
            match emv_card::interop::form_factor_name(value[1] & 0x0F) {
                Some(device) => format!("{} ({device})", hex::encode_upper(value)),
                None => format!("{} (undefined form factor)", hex::encode_upper(value)),
            }
        }

        // Track 2 Data
        tags::TRACK_2_EQUIVALENT_DATA => hex::encode_upper(value).replace('D', " | "),

        // Default: hex for everything else
        _ => hex::encode_upper(value),
    }
}

fn bcd_number(value: &[u8]) -> u64 {
    value.iter().fold(0, |acc, &byte| {
        acc * 100 + u64::from(byte >> 4) * 10 + u64::from(byte & 0x0F)
    })
}

/// ISO 3166-1 numeric country codes (subset)
fn get_country_name(code: u64) -> Option<&'static str> {
    match code {
        124 => Some("Canada"),
        840 => Some("United States"),
        826 => Some("United Kingdom"),
        276 => Some("Germany"),
        250 => Some("France"),
        380 => Some("Italy"),
        724 => Some("Spain"),
        528 => Some("Netherlands"),
        156 => Some("China"),
        392 => Some("Japan"),
        _ => None,
    }
}

/// ISO 4217 numeric currency codes (subset)
fn get_currency_name(code: u64) -> Option<&'static str> {
    match code {
        124 => Some("CAD (Canadian Dollar)"),
        840 => Some("USD (US Dollar)"),
        978 => Some("EUR (Euro)"),
        826 => Some("GBP (Pound Sterling)"),
        392 => Some("JPY (Japanese Yen)"),
        156 => Some("CNY (Chinese Yuan)"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_mode_is_hex() {
        assert_eq!(format_value(tags::APPLICATION_LABEL, b"VISA", FormatMode::Raw), "56495341");
    }

    #[test]
    fn test_human_values() {
        assert_eq!(format_value(tags::APPLICATION_LABEL, b"VISA", FormatMode::Human), "VISA");
        assert_eq!(
            format_value(tags::TRANSACTION_CURRENCY_CODE, &[0x08, 0x40], FormatMode::Human),
            "USD (US Dollar)"
        );
        assert_eq!(
            format_value(tags::AMOUNT_AUTHORISED, &[0, 0, 0, 0, 0x10, 0x00], FormatMode::Human),
            "10.00"
        );
        assert_eq!(
            format_value(tags::KERNEL_IDENTIFIER, &[0x08], FormatMode::Human),
            "Common Kernel (C8)"
        );
    }
}
