use std::fmt;

/// Security scheme advertised by a Wi-Fi QR payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    Open,
    Wpa,
    Wep,
}

impl EncryptionType {
    fn from_wifi_field(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "WEP" => EncryptionType::Wep,
            "WPA" | "WPA2" | "WPA3" | "SAE" | "WPA2-EAP" => EncryptionType::Wpa,
            _ => EncryptionType::Open,
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionType::Open => f.write_str("OPEN"),
            EncryptionType::Wpa => f.write_str("WPA"),
            EncryptionType::Wep => f.write_str("WEP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
    pub encryption: EncryptionType,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBookmark {
    /// Empty when the payload is a bare URL.
    pub title: String,
    pub url: String,
}

/// Structured interpretation of a barcode's raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum BarcodeValue {
    Wifi(WifiCredentials),
    Url(UrlBookmark),
    Email {
        address: String,
        subject: String,
        body: String,
    },
    Phone(String),
    Sms {
        number: String,
        message: String,
    },
    Geo {
        lat: f64,
        lng: f64,
    },
    Text,
}

/// One decoded symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Barcode {
    pub raw_value: String,
    pub value: BarcodeValue,
}

impl Barcode {
    /// Classify a raw payload. Malformed structured payloads fall back to
    /// [`BarcodeValue::Text`].
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw_value = raw.into();
        let value = classify_value(raw_value.trim()).unwrap_or(BarcodeValue::Text);
        Self { raw_value, value }
    }

    pub fn wifi(&self) -> Option<&WifiCredentials> {
        match &self.value {
            BarcodeValue::Wifi(w) => Some(w),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&UrlBookmark> {
        match &self.value {
            BarcodeValue::Url(u) => Some(u),
            _ => None,
        }
    }

    /// Short type name for logging.
    pub fn value_type(&self) -> &'static str {
        match self.value {
            BarcodeValue::Wifi(_) => "wifi",
            BarcodeValue::Url(_) => "url",
            BarcodeValue::Email { .. } => "email",
            BarcodeValue::Phone(_) => "phone",
            BarcodeValue::Sms { .. } => "sms",
            BarcodeValue::Geo { .. } => "geo",
            BarcodeValue::Text => "text",
        }
    }
}

fn classify_value(raw: &str) -> Option<BarcodeValue> {
    if let Some(rest) = strip_prefix_ci(raw, "WIFI:") {
        return parse_wifi(rest).map(BarcodeValue::Wifi);
    }
    if let Some(rest) = strip_prefix_ci(raw, "MEBKM:") {
        return parse_bookmark(rest).map(BarcodeValue::Url);
    }
    if let Some(rest) =
        strip_prefix_ci(raw, "URLTO:").or_else(|| strip_prefix_ci(raw, "URL:"))
    {
        return non_empty(rest).map(|url| {
            BarcodeValue::Url(UrlBookmark {
                title: String::new(),
                url,
            })
        });
    }
    if strip_prefix_ci(raw, "http://").is_some() || strip_prefix_ci(raw, "https://").is_some() {
        if raw.chars().any(char::is_whitespace) {
            return None;
        }
        return Some(BarcodeValue::Url(UrlBookmark {
            title: String::new(),
            url: raw.to_string(),
        }));
    }
    if let Some(rest) = strip_prefix_ci(raw, "MATMSG:") {
        return parse_matmsg(rest);
    }
    if let Some(rest) = strip_prefix_ci(raw, "mailto:") {
        return parse_mailto(rest);
    }
    if let Some(rest) = strip_prefix_ci(raw, "tel:") {
        return non_empty(rest).map(BarcodeValue::Phone);
    }
    if let Some(rest) = strip_prefix_ci(raw, "SMSTO:").or_else(|| strip_prefix_ci(raw, "sms:")) {
        let (number, message) = rest.split_once(':').unwrap_or((rest, ""));
        return non_empty(number).map(|number| BarcodeValue::Sms {
            number,
            message: message.to_string(),
        });
    }
    if let Some(rest) = strip_prefix_ci(raw, "geo:") {
        return parse_geo(rest);
    }
    None
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Split `K:v;K:v;;` into pairs, honouring backslash escapes.
fn split_fields(body: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in body.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ';' => {
                if let Some(field) = take_field(&mut current) {
                    fields.push(field);
                }
            }
            _ => current.push(c),
        }
    }
    if let Some(field) = take_field(&mut current) {
        fields.push(field);
    }
    fields
}

fn take_field(current: &mut String) -> Option<(String, String)> {
    let field = std::mem::take(current);
    if field.is_empty() {
        return None;
    }
    // Escaped colons were already unescaped, so only the first colon separates.
    let (key, value) = field.split_once(':')?;
    Some((key.trim().to_ascii_uppercase(), value.to_string()))
}

fn parse_wifi(body: &str) -> Option<WifiCredentials> {
    let mut ssid = None;
    let mut password = String::new();
    let mut encryption = EncryptionType::Open;
    let mut hidden = false;

    for (key, value) in split_fields(body) {
        match key.as_str() {
            "S" => ssid = Some(value),
            "P" => password = value,
            "T" => encryption = EncryptionType::from_wifi_field(&value),
            "H" => hidden = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    Some(WifiCredentials {
        ssid: ssid?,
        password,
        encryption,
        hidden,
    })
}

fn parse_bookmark(body: &str) -> Option<UrlBookmark> {
    let mut title = String::new();
    let mut url = None;
    for (key, value) in split_fields(body) {
        match key.as_str() {
            "TITLE" => title = value,
            "URL" => url = non_empty(&value),
            _ => {}
        }
    }
    Some(UrlBookmark { title, url: url? })
}

fn parse_matmsg(body: &str) -> Option<BarcodeValue> {
    let mut address = None;
    let mut subject = String::new();
    let mut message = String::new();
    for (key, value) in split_fields(body) {
        match key.as_str() {
            "TO" => address = non_empty(&value),
            "SUB" => subject = value,
            "BODY" => message = value,
            _ => {}
        }
    }
    Some(BarcodeValue::Email {
        address: address?,
        subject,
        body: message,
    })
}

fn parse_mailto(rest: &str) -> Option<BarcodeValue> {
    let (address, query) = rest.split_once('?').unwrap_or((rest, ""));
    let mut subject = String::new();
    let mut body = String::new();
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some((k, v)) if k.eq_ignore_ascii_case("subject") => subject = v.to_string(),
            Some((k, v)) if k.eq_ignore_ascii_case("body") => body = v.to_string(),
            _ => {}
        }
    }
    Some(BarcodeValue::Email {
        address: non_empty(address)?,
        subject,
        body,
    })
}

fn parse_geo(rest: &str) -> Option<BarcodeValue> {
    // geo:lat,lng[,alt][;params][?query]
    let coords = rest.split(['?', ';']).next()?;
    let mut parts = coords.split(',');
    let lat = parts.next()?.trim().parse::<f64>().ok()?;
    let lng = parts.next()?.trim().parse::<f64>().ok()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some(BarcodeValue::Geo { lat, lng })
}
