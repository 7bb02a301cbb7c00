//! Rule-based User-Agent classification.
//!
//! Each table is checked in order and the first rule with a matching token
//! wins, so more specific products sit above the ones they impersonate
//! (Edge and Opera both advertise `Chrome/`, Android advertises `Linux`).

use crate::analytics::models::UNKNOWN;

pub const OS_WINDOWS: &str = "Windows";
pub const OS_ANDROID: &str = "Android";
pub const OS_IOS: &str = "iOS";
pub const OS_MACOS: &str = "MacOS";
pub const OS_LINUX: &str = "Linux";

pub const DEVICE_MOBILE: &str = "Mobile";
pub const DEVICE_DESKTOP: &str = "Desktop";

const OS_RULES: &[(&str, &[&str])] = &[
    (OS_WINDOWS, &["Windows"]),
    (OS_ANDROID, &["Android"]),
    (OS_IOS, &["iPhone", "iPad", "iPod"]),
    (OS_MACOS, &["Macintosh", "Mac OS X"]),
    (OS_LINUX, &["Linux"]),
];

const BROWSER_RULES: &[(&str, &[&str])] = &[
    ("Edge", &["Edg/", "EdgA/", "EdgiOS/", "Edge/"]),
    ("Opera", &["OPR/", "OPiOS/", "Opera"]),
    ("Chrome", &["Chrome/", "CriOS/"]),
    ("Firefox", &["Firefox/", "FxiOS/"]),
    ("Safari", &["Safari/"]),
    ("Internet Explorer", &["MSIE ", "Trident/"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentInfo {
    pub device: &'static str,
    pub os: &'static str,
    pub browser: &'static str,
}

pub fn classify(user_agent: &str) -> AgentInfo {
    let os = first_match(OS_RULES, user_agent);
    AgentInfo {
        device: device_for_os(os),
        os,
        browser: first_match(BROWSER_RULES, user_agent),
    }
}

fn first_match(rules: &[(&'static str, &[&str])], user_agent: &str) -> &'static str {
    rules
        .iter()
        .find(|(_, tokens)| tokens.iter().any(|token| user_agent.contains(token)))
        .map(|(name, _)| *name)
        .unwrap_or(UNKNOWN)
}

fn device_for_os(os: &str) -> &'static str {
    match os {
        OS_ANDROID | OS_IOS => DEVICE_MOBILE,
        OS_WINDOWS | OS_MACOS | OS_LINUX => DEVICE_DESKTOP,
        _ => UNKNOWN,
    }
}
