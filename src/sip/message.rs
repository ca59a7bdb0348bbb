//! SIP message model: requests, responses, raw headers plus the accessors
//! the dialog core needs (identity users, Via parameters, Expires).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Info,
    Publish,
    Unknown(String),
}

impl SipMethod {
    pub fn as_str(&self) -> &str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Options => "OPTIONS",
            SipMethod::Register => "REGISTER",
            SipMethod::Info => "INFO",
            SipMethod::Publish => "PUBLISH",
            SipMethod::Unknown(token) => token.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipHeader {
    pub name: String,
    pub value: String,
}

impl SipHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: SipMethod,
    pub uri: String,
    pub version: String,
    pub headers: Vec<SipHeader>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SipResponse {
    pub version: String,
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: Vec<SipHeader>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipRequest {
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header_value("Call-ID")
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn from_user(&self) -> Option<String> {
        self.header_value("From").and_then(uri_user)
    }

    pub fn to_user(&self) -> Option<String> {
        self.header_value("To").and_then(uri_user)
    }

    /// Expires from the header, falling back to the Contact `expires`
    /// parameter, defaulting to 3600.
    pub fn expires(&self) -> u32 {
        if let Some(v) = self.header_value("Expires") {
            if let Ok(n) = v.trim().parse() {
                return n;
            }
        }
        self.header_value("Contact")
            .and_then(|c| header_param(c, "expires"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600)
    }

    /// Contact address and port, when the Contact URI carries them.
    pub fn contact_host_port(&self) -> Option<(String, u16)> {
        let contact = self.header_value("Contact")?;
        let uri = extract_uri(contact)?;
        let after_scheme = uri.split_once(':').map(|(_, rest)| rest)?;
        let hostport = after_scheme.split_once('@').map_or(after_scheme, |(_, h)| h);
        let hostport = hostport.split(';').next().unwrap_or(hostport);
        match hostport.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().ok()?;
                Some((host.to_string(), port))
            }
            None => Some((hostport.to_string(), 5060)),
        }
    }

    /// The `received` parameter of the topmost Via, when present.
    pub fn via_received(&self) -> Option<String> {
        self.header_value("Via").and_then(|v| header_param(v, "received"))
    }
}

/// Extract the user part of the first SIP URI in a header value, coping
/// with display names and angle brackets.
pub fn uri_user(value: &str) -> Option<String> {
    let uri = extract_uri(value)?;
    let rest = uri
        .strip_prefix("sips:")
        .or_else(|| uri.strip_prefix("sip:"))?;
    let user = rest.split('@').next()?;
    if user.is_empty() || user == rest {
        return None; // no user part at all
    }
    Some(user.split(';').next().unwrap_or(user).to_string())
}

/// Owned URI portion of a name-addr header value, e.g. the Contact target.
pub fn uri_from_header(value: &str) -> Option<String> {
    extract_uri(value).map(str::to_string)
}

/// The URI portion of a name-addr or addr-spec header value.
fn extract_uri(value: &str) -> Option<&str> {
    if let (Some(start), Some(end)) = (value.find('<'), value.find('>')) {
        if start < end {
            return Some(&value[start + 1..end]);
        }
    }
    let trimmed = value.trim();
    let end = trimmed.find(|c: char| c == ';' || c.is_whitespace());
    Some(match end {
        Some(i) => &trimmed[..i],
        None => trimmed,
    })
}

/// A `;name=value` parameter of a header value.
pub fn header_param(value: &str, name: &str) -> Option<String> {
    for part in value.split(';').skip(1) {
        let part = part.trim();
        if let Some((k, v)) = part.split_once('=') {
            if k.trim().eq_ignore_ascii_case(name) {
                return Some(v.trim().trim_matches('"').to_string());
            }
        }
    }
    None
}
