//! Compressed host-list expansion, e.g. `a[01-10],a15` (§6 `Hosts` option,
//! §10.3). A small recursive-descent parser over a PBS/Slurm-style syntax:
//! a run of literal characters, optionally followed by a bracketed,
//! comma-separated list of single values or `lo-hi` ranges, all separated at
//! the top level by commas.

use spawn_error::{Error, Result};

/// Expands a compressed host-list string into one entry per host, in the
/// order written. Padding width inside a range (`a01`..`a10`) is preserved.
pub fn expand(spec: &str) -> Result<Vec<String>> {
    let mut hosts = Vec::new();
    for group in split_top_level(spec) {
        expand_group(group.trim(), &mut hosts)?;
    }
    if hosts.is_empty() {
        return Err(Error::Invalid(format!("host list {spec:?} expanded to zero hosts")));
    }
    Ok(hosts)
}

/// Splits on commas that are not inside a `[...]` bracket.
fn split_top_level(spec: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in spec.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                groups.push(&spec[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    groups.push(&spec[start..]);
    groups
}

fn expand_group(group: &str, out: &mut Vec<String>) -> Result<()> {
    if group.is_empty() {
        return Err(Error::Invalid("empty host-list group".into()));
    }
    let Some(open) = group.find('[') else {
        out.push(group.to_string());
        return Ok(());
    };
    if !group.ends_with(']') {
        return Err(Error::Invalid(format!("unterminated bracket in host-list group {group:?}")));
    }
    let prefix = &group[..open];
    let inner = &group[open + 1..group.len() - 1];
    for part in inner.split(',') {
        expand_range(prefix, part.trim(), out)?;
    }
    Ok(())
}

fn expand_range(prefix: &str, part: &str, out: &mut Vec<String>) -> Result<()> {
    match part.split_once('-') {
        Some((lo, hi)) => {
            let width = lo.len();
            let lo_n: u32 = lo
                .parse()
                .map_err(|_| Error::Invalid(format!("non-numeric range start {lo:?} in host list")))?;
            let hi_n: u32 = hi
                .parse()
                .map_err(|_| Error::Invalid(format!("non-numeric range end {hi:?} in host list")))?;
            if hi_n < lo_n {
                return Err(Error::Invalid(format!("descending range {lo}-{hi} in host list")));
            }
            for n in lo_n..=hi_n {
                out.push(format!("{prefix}{n:0width$}"));
            }
        }
        None => {
            out.push(format!("{prefix}{part}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_simple_range_preserving_padding() {
        let hosts = expand("a[01-03]").unwrap();
        assert_eq!(hosts, vec!["a01", "a02", "a03"]);
    }

    #[test]
    fn expands_mixed_ranges_and_literals() {
        let hosts = expand("a[01-03,07],b2").unwrap();
        assert_eq!(hosts, vec!["a01", "a02", "a03", "a07", "b2"]);
    }

    #[test]
    fn plain_comma_list_without_brackets() {
        let hosts = expand("h1,h2,h3").unwrap();
        assert_eq!(hosts, vec!["h1", "h2", "h3"]);
    }

    #[test]
    fn unterminated_bracket_is_invalid() {
        assert!(expand("a[01-03").is_err());
    }

    #[test]
    fn descending_range_is_invalid() {
        assert!(expand("a[10-01]").is_err());
    }
}
