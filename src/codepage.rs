/// Resolves ".dbf" code-page descriptors to text encodings.
///
/// The format stores attribute text as raw bytes in a locale- or
/// vendor-specific code page, described (when described at all) by either
/// the contents of a ".cpg" companion file or a legacy "language driver id"
/// byte in the header. The descriptor takes several shapes in the wild:
///
/// * `LDID/<n>` — a language driver id, mapped through a fixed table
///   (http://www.autopark.ru/ASBProgrammerGuide/DBFSTRUC.HTM)
/// * `CP<n>` — a code page number, used directly
/// * `8859-<n>` / `8859<n>` — an ISO-8859 family member
/// * `UTF-8` / `UTF8` prefixes — UTF-8
/// * `ANSI 1251` — CP1251
///
/// Anything else passes through verbatim; callers treat a name with no
/// converter as "copy the raw bytes and report a problem".
use encoding::EncodingRef;
use encoding::label::encoding_from_whatwg_label;
use regex::Regex;

lazy_static! {
    static ref LDID_RE: Regex = Regex::new(r"^LDID/([0-9]+)$").unwrap();
    static ref CP_RE: Regex = Regex::new(r"^CP([0-9]+)$").unwrap();
    static ref ISO_8859_RE: Regex = Regex::new(r"^8859-?([0-9]+)$").unwrap();
}

/// Stands in for ISO-8859-1 in the LDID table, which otherwise yields
/// DOS/Windows code page numbers.
const CODE_PAGE_ISO_8859_1: u32 = 88591;

/// Code page for a language driver id, per the xBase LDID table.
fn code_page_from_ldid(ldid: u32) -> Option<u32> {
    match ldid {
        1 => Some(437),
        2 => Some(850),
        3 => Some(1252),
        4 => Some(10000),
        8 => Some(865),
        10 => Some(850),
        11 => Some(437),
        13 => Some(437),
        14 => Some(850),
        15 => Some(437),
        16 => Some(850),
        17 => Some(437),
        18 => Some(850),
        19 => Some(932),
        20 => Some(850),
        21 => Some(437),
        22 => Some(850),
        23 => Some(865),
        24 => Some(437),
        25 => Some(437),
        26 => Some(850),
        27 => Some(437),
        28 => Some(863),
        29 => Some(850),
        31 => Some(852),
        34 => Some(852),
        35 => Some(852),
        36 => Some(860),
        37 => Some(850),
        38 => Some(866),
        55 => Some(850),
        64 => Some(852),
        77 => Some(936),
        78 => Some(949),
        79 => Some(950),
        80 => Some(874),
        87 => Some(CODE_PAGE_ISO_8859_1),
        88 => Some(1252),
        89 => Some(1252),
        100 => Some(852),
        101 => Some(866),
        102 => Some(865),
        103 => Some(861),
        104 => Some(895),
        105 => Some(620),
        106 => Some(737),
        107 => Some(857),
        108 => Some(863),
        120 => Some(950),
        121 => Some(949),
        122 => Some(936),
        123 => Some(932),
        124 => Some(874),
        134 => Some(737),
        135 => Some(852),
        136 => Some(857),
        150 => Some(10007),
        151 => Some(10029),
        200 => Some(1250),
        201 => Some(1251),
        202 => Some(1254),
        203 => Some(1253),
        204 => Some(1257),
        _ => None,
    }
}

/// Resolves a code-page descriptor to a canonical encoding name, e.g.
/// `"LDID/19"` to `"CP932"` or `"8859-1"` to `"ISO-8859-1"`.
///
/// Descriptors that resolve nowhere (unknown LDIDs, code pages outside the
/// DOS/Windows ranges) come back verbatim: unresolved, but preserved for
/// error messages. An empty descriptor stays empty; the caller picks the
/// default.
pub fn resolve_encoding(descriptor: &str) -> String {
    if descriptor.is_empty() {
        return String::new();
    }

    let code_page: Option<u32> = if let Some(caps) = LDID_RE.captures(descriptor) {
        caps[1].parse().ok().and_then(code_page_from_ldid)
    } else if let Some(caps) = CP_RE.captures(descriptor) {
        caps[1].parse().ok()
    } else {
        None
    };

    match code_page {
        Some(CODE_PAGE_ISO_8859_1) => String::from("ISO-8859-1"),
        Some(n) if (n >= 437 && n <= 950) || (n >= 1250 && n <= 1258) => format!("CP{}", n),
        _ => {
            if let Some(caps) = ISO_8859_RE.captures(descriptor) {
                format!("ISO-8859-{}", &caps[1])
            } else if descriptor.starts_with("UTF-8") || descriptor.starts_with("UTF8") {
                String::from("UTF-8")
            } else if descriptor.starts_with("ANSI 1251") {
                String::from("CP1251")
            } else {
                String::from(descriptor)
            }
        }
    }
}

/// A converter for a resolved encoding name, when the `encoding` crate has
/// one.
///
/// The DOS code pages (437, 850, ...) have no converter here; their cells
/// fall back to a raw-bytes pass-through with a recorded problem.
pub fn encoding_for(resolved: &str) -> Option<EncodingRef> {
    if resolved.is_empty() {
        return encoding_from_whatwg_label("utf-8");
    }

    if let Some(caps) = CP_RE.captures(resolved) {
        let code_page: u32 = match caps[1].parse() {
            Err(_) => return None,
            Ok(n) => n,
        };
        let label = match code_page {
            866 => String::from("ibm866"),
            874 => String::from("windows-874"),
            932 => String::from("windows-31j"),
            936 => String::from("gbk"),
            949 => String::from("euc-kr"),
            950 => String::from("big5"),
            n if n >= 1250 && n <= 1258 => format!("windows-{}", n),
            _ => return None,
        };
        return encoding_from_whatwg_label(&label);
    }

    encoding_from_whatwg_label(&resolved.to_lowercase())
}

#[cfg(test)]
mod test {
    use super::{encoding_for, resolve_encoding};

    #[test]
    fn ldid_descriptors() {
        assert_eq!("CP932", resolve_encoding("LDID/19"));
        assert_eq!("CP1252", resolve_encoding("LDID/3"));
        assert_eq!("CP936", resolve_encoding("LDID/77"));
        assert_eq!("ISO-8859-1", resolve_encoding("LDID/87"));
    }

    #[test]
    fn unknown_ldid_passes_through() {
        assert_eq!("LDID/999", resolve_encoding("LDID/999"));
        // Mac code pages resolve to numbers outside the supported ranges.
        assert_eq!("LDID/4", resolve_encoding("LDID/4"));
    }

    #[test]
    fn cp_descriptors() {
        assert_eq!("CP1251", resolve_encoding("CP1251"));
        assert_eq!("CP437", resolve_encoding("CP437"));
        // Out of both ranges: verbatim.
        assert_eq!("CP1100", resolve_encoding("CP1100"));
    }

    #[test]
    fn iso_8859_descriptors() {
        assert_eq!("ISO-8859-1", resolve_encoding("8859-1"));
        assert_eq!("ISO-8859-5", resolve_encoding("88595"));
    }

    #[test]
    fn utf8_and_ansi_descriptors() {
        assert_eq!("UTF-8", resolve_encoding("UTF-8"));
        assert_eq!("UTF-8", resolve_encoding("UTF8"));
        assert_eq!("CP1251", resolve_encoding("ANSI 1251"));
    }

    #[test]
    fn empty_descriptor_stays_empty() {
        assert_eq!("", resolve_encoding(""));
    }

    #[test]
    fn anything_else_passes_through() {
        assert_eq!("KOI8-R", resolve_encoding("KOI8-R"));
    }

    #[test]
    fn converters() {
        assert!(encoding_for("UTF-8").is_some());
        assert!(encoding_for("").is_some());
        assert!(encoding_for("CP932").is_some());
        assert!(encoding_for("CP1252").is_some());
        assert!(encoding_for("ISO-8859-5").is_some());
        // No DOS code page tables in the encoding crate.
        assert!(encoding_for("CP437").is_none());
        assert!(encoding_for("LDID/999").is_none());
    }

    #[test]
    fn converted_text_round_trip() {
        use encoding::DecoderTrap;

        let latin1 = encoding_for("ISO-8859-1").unwrap();
        assert_eq!("caf\u{e9}", latin1.decode(&[0x63, 0x61, 0x66, 0xe9], DecoderTrap::Strict).unwrap());
    }
}
