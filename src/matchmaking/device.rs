//! Device affinity classes used to keep touch and desktop players apart

use std::fmt;

use serde::Serialize;

/// User-Agent fragments that mark a mobile browser
const MOBILE_MARKERS: [&str; 8] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Coarse device class; rooms are never shared across classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Desktop,
}

impl DeviceClass {
    /// Resolve from the client-supplied `deviceType` hint, falling back to
    /// sniffing the User-Agent when the hint is missing or unknown
    pub fn resolve(hint: Option<&str>, user_agent: Option<&str>) -> Self {
        match hint.map(|h| h.trim().to_ascii_lowercase()).as_deref() {
            Some("mobile") => DeviceClass::Mobile,
            Some("pc") | Some("desktop") => DeviceClass::Desktop,
            _ => Self::sniff(user_agent.unwrap_or_default()),
        }
    }

    pub fn sniff(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Desktop => "desktop",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
