//! Module shim registry.
//!
//! Plugins `require` a small set of npm packages. Each name resolves to a
//! shim shipped with the host: a JavaScript facade over native operations
//! (see the sibling modules) or a self-contained functional stand-in.
//! Unknown names resolve to an empty object.

pub mod crypto;
pub mod date;
pub mod html;
pub mod path;
pub mod qs;
pub mod text;

use std::fmt::Write as _;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShimKind {
    /// Facade whose heavy lifting runs in Rust.
    Native,
    /// Pure JavaScript stand-in.
    Functional,
}

#[derive(Debug, Clone, Copy)]
pub struct ShimEntry {
    pub name: &'static str,
    pub kind: ShimKind,
    source: &'static str,
}

impl ShimEntry {
    const fn native(name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            kind: ShimKind::Native,
            source,
        }
    }

    const fn functional(name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            kind: ShimKind::Functional,
            source,
        }
    }

    /// Factory body, run as `function (module, exports, require, host)`.
    pub fn source(&self) -> &'static str {
        self.source
    }
}

const ENTRIES: [ShimEntry; 10] = [
    ShimEntry::native("axios", include_str!("../../js/shims/axios.js")),
    ShimEntry::native("cheerio", include_str!("../../js/shims/cheerio.js")),
    ShimEntry::native("crypto-js", include_str!("../../js/shims/crypto-js.js")),
    ShimEntry::functional("big-integer", include_str!("../../js/shims/big-integer.js")),
    ShimEntry::native("qs", include_str!("../../js/shims/qs.js")),
    ShimEntry::native("dayjs", include_str!("../../js/shims/dayjs.js")),
    ShimEntry::native("he", include_str!("../../js/shims/he.js")),
    ShimEntry::functional("webdav", include_str!("../../js/shims/webdav.js")),
    ShimEntry::native("path", include_str!("../../js/shims/path.js")),
    ShimEntry::native("url", include_str!("../../js/shims/url.js")),
];

const ALIASES: [(&str, &str); 6] = [
    ("cheerio/lib/slim", "cheerio"),
    ("crypto-js/core", "crypto-js"),
    ("big-integer/BigInteger", "big-integer"),
    ("path/posix", "path"),
    ("querystring", "qs"),
    ("dayjs/esm", "dayjs"),
];

/// Static `name → shim` map injected into every sandbox.
#[derive(Debug)]
pub struct ShimRegistry {
    entries: &'static [ShimEntry],
    aliases: &'static [(&'static str, &'static str)],
}

static BUILTIN: ShimRegistry = ShimRegistry {
    entries: &ENTRIES,
    aliases: &ALIASES,
};

impl ShimRegistry {
    pub fn builtin() -> &'static ShimRegistry {
        &BUILTIN
    }

    pub fn entries(&self) -> &[ShimEntry] {
        self.entries
    }

    /// Resolve a `require` specifier.
    ///
    /// `node:` prefixes are dropped, listed aliases are followed and
    /// `crypto-js/<algo>` subpaths map to the full `crypto-js` shim.
    pub fn resolve(&self, specifier: &str) -> Option<&ShimEntry> {
        let name = specifier.trim();
        let name = name.strip_prefix("node:").unwrap_or(name);
        let name = self
            .aliases
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, target)| *target)
            .unwrap_or(name);
        if let Some(entry) = self.entries.iter().find(|e| e.name == name) {
            return Some(entry);
        }
        let package = name.split('/').next().unwrap_or(name);
        if package == "crypto-js" {
            return self.entries.iter().find(|e| e.name == package);
        }
        None
    }

    /// Script that defines every shim factory under a temporary global the
    /// prelude picks up and removes.
    pub fn install_script(&self) -> String {
        let mut script = String::from("(function (defs) {\n");
        for entry in self.entries {
            let kind = match entry.kind {
                ShimKind::Native => "native",
                ShimKind::Functional => "functional",
            };
            // writing to a String cannot fail
            let _ = write!(
                script,
                "defs[{name:?}] = {{ kind: {kind:?}, factory: function (module, exports, require, host) {{\n{src}\n}} }};\n",
                name = entry.name,
                src = entry.source,
            );
        }
        script.push_str("})(globalThis.__tunebridge_shims = Object.create(null));\n");
        script
    }
}
