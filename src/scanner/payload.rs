// SPDX-License-Identifier: GPL-3.0-only

//! Classification of decoded payloads
//!
//! Codes often carry URIs or the `WIFI:` credential format. Knowing which one
//! lets the UI offer an "open" action next to the raw text.

/// What a decoded payload represents
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadAction {
    /// Web link
    Url(String),
    /// Phone number (`tel:`)
    Phone(String),
    /// E-mail address (`mailto:`), with the raw query kept for the mail client
    Email { address: String, query: String },
    /// SMS recipient (`sms:` / `smsto:`)
    Sms {
        number: String,
        message: Option<String>,
    },
    /// Geographic coordinates (`geo:`)
    Location { latitude: f64, longitude: f64 },
    /// Wi-Fi credentials (`WIFI:T:WPA;S:ssid;P:password;;`)
    Wifi {
        ssid: String,
        password: Option<String>,
        security: String,
        hidden: bool,
    },
    /// Anything else
    Text(String),
}

impl PayloadAction {
    /// Classify a decoded payload, falling back to `Text`
    pub fn parse(payload: &str) -> Self {
        let trimmed = payload.trim();

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "WIFI:") {
            return parse_wifi(rest);
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Self::Url(trimmed.to_string());
        }
        if let Some(number) = strip_prefix_ignore_case(trimmed, "tel:") {
            return Self::Phone(number.to_string());
        }
        if let Some(rest) = strip_prefix_ignore_case(trimmed, "mailto:") {
            let (address, query) = rest.split_once('?').unwrap_or((rest, ""));
            return Self::Email {
                address: address.to_string(),
                query: query.to_string(),
            };
        }
        if let Some(rest) = strip_prefix_ignore_case(trimmed, "smsto:")
            .or_else(|| strip_prefix_ignore_case(trimmed, "sms:"))
        {
            return parse_sms(rest);
        }
        if let Some(rest) = strip_prefix_ignore_case(trimmed, "geo:")
            && let Some(location) = parse_geo(rest)
        {
            return location;
        }

        Self::Text(trimmed.to_string())
    }

    /// URI handed to the desktop's default handler, if the payload has one
    pub fn open_target(&self) -> Option<String> {
        match self {
            Self::Url(url) => Some(url.clone()),
            Self::Phone(number) => Some(format!("tel:{}", number)),
            Self::Email { address, query } if query.is_empty() => {
                Some(format!("mailto:{}", address))
            }
            Self::Email { address, query } => Some(format!("mailto:{}?{}", address, query)),
            Self::Sms { number, .. } => Some(format!("sms:{}", number)),
            Self::Location {
                latitude,
                longitude,
            } => Some(format!("geo:{},{}", latitude, longitude)),
            Self::Wifi { .. } | Self::Text(_) => None,
        }
    }

    /// Label of the "open" action
    pub fn action_label(&self) -> &'static str {
        match self {
            Self::Url(_) => "Open Link",
            Self::Phone(_) => "Call",
            Self::Email { .. } => "Send Email",
            Self::Sms { .. } => "Send SMS",
            Self::Location { .. } => "Open Map",
            Self::Wifi { .. } => "Wi-Fi Network",
            Self::Text(_) => "Text",
        }
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Split on `;` while honouring backslash escapes
fn split_escaped(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ';' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

fn parse_wifi(fields: &str) -> PayloadAction {
    let mut ssid = String::new();
    let mut password = None;
    let mut security = String::from("nopass");
    let mut hidden = false;

    for field in split_escaped(fields) {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        match key {
            "S" => ssid = value.to_string(),
            "P" if !value.is_empty() => password = Some(value.to_string()),
            "T" if !value.is_empty() => security = value.to_string(),
            "H" => hidden = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    PayloadAction::Wifi {
        ssid,
        password,
        security,
        hidden,
    }
}

fn parse_sms(rest: &str) -> PayloadAction {
    // smsto:NUMBER:MESSAGE and sms:NUMBER?body=MESSAGE are both in the wild
    if let Some((number, message)) = rest.split_once(':') {
        return PayloadAction::Sms {
            number: number.to_string(),
            message: Some(message.to_string()).filter(|m| !m.is_empty()),
        };
    }

    let (number, query) = rest.split_once('?').unwrap_or((rest, ""));
    let message = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("body"))
        .map(|(_, value)| percent_decode(value));

    PayloadAction::Sms {
        number: number.to_string(),
        message,
    }
}

fn parse_geo(rest: &str) -> Option<PayloadAction> {
    let coords = rest.split(['?', ';']).next()?;
    let mut parts = coords.split(',');
    let latitude = parts.next()?.trim().parse::<f64>().ok()?;
    let longitude = parts.next()?.trim().parse::<f64>().ok()?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(PayloadAction::Location {
        latitude,
        longitude,
    })
}

/// Decode `%XX` escapes and `+` in query values
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
