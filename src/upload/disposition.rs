//! Content-Disposition parsing for multipart sections.

/// Parsed `Content-Disposition: form-data; ...` header of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Form field name.
    pub name: Option<String>,
    /// Client-supplied file name (`filename*` preferred over `filename`).
    pub file_name: Option<String>,
}

impl ContentDisposition {
    /// Parse a header value.
    ///
    /// Returns `None` when the disposition type is not `form-data`.
    /// An empty file name is treated as absent.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = split_params(value).into_iter();
        let disposition_type = parts.next()?;
        if !disposition_type.trim().eq_ignore_ascii_case("form-data") {
            return None;
        }

        let mut name = None;
        let mut file_name = None;
        let mut file_name_ext = None;

        for part in parts {
            let Some((key, raw)) = part.split_once('=') else {
                continue;
            };
            let raw = raw.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(unquote(raw)),
                "filename" => file_name = Some(unquote(raw)),
                "filename*" => file_name_ext = decode_ext_value(raw),
                _ => {}
            }
        }

        Some(Self {
            name: name.filter(|n| !n.is_empty()),
            file_name: file_name_ext.or(file_name).filter(|f| !f.is_empty()),
        })
    }

    /// Whether this section carries a file.
    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }
}

/// Split on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };

    // Only `\"` and `\\` are escapes; browsers send Windows paths unescaped.
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('\\', Some(&next)) if next == '"' || next == '\\' => {
                out.push(next);
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

/// Decode an RFC 5987 extended value (`charset'lang'percent-encoded`).
fn decode_ext_value(raw: &str) -> Option<String> {
    let mut pieces = raw.splitn(3, '\'');
    let charset = pieces.next()?;
    let _language = pieces.next()?;
    let encoded = pieces.next()?;
    let bytes = urlencoding::decode_binary(encoded.as_bytes());

    if charset.eq_ignore_ascii_case("utf-8") {
        String::from_utf8(bytes.into_owned()).ok()
    } else if charset.eq_ignore_ascii_case("iso-8859-1") {
        Some(bytes.iter().map(|&b| b as char).collect())
    } else {
        None
    }
}
