//! Plan 9 path grammar: parsing, cleaning, and serializing path names.
//!
//! A path is rooted (`/a/b`), device-relative (`#d/a/b`), or relative to
//! the caller's current directory (`a/b`, or no elements at all). Parsing
//! also collapses `.` segments and pops `..` the way a shell's `cleanname`
//! would, except that `..` past the root stays put and `..` cannot pop a
//! preceding `..` that itself couldn't be resolved.

/// The base a parsed path resolves against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Root {
    /// Leading `/`: resolves from the namespace root.
    Rooted,
    /// Leading `#name`: resolves from a device/qid reference.
    Device,
    /// No sigil: resolves relative to the caller's current directory.
    Relative,
}

/// A parsed, cleaned path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub root: Root,
    /// Present only when `root == Device`.
    pub device: Option<String>,
    pub elements: Vec<String>,
    /// Whether the path must name a directory (trailing `/`).
    pub must_be_dir: bool,
}

impl Path {
    pub fn rooted(elements: Vec<String>) -> Path {
        Path { root: Root::Rooted, device: None, elements, must_be_dir: false }
    }

    pub fn relative(elements: Vec<String>) -> Path {
        Path { root: Root::Relative, device: None, elements, must_be_dir: false }
    }
}

/// Parse and clean a path string.
///
/// An empty string parses to a relative path with no elements (cwd itself).
pub fn parse(s: &str) -> Path {
    let (root, device, rest) = if let Some(stripped) = s.strip_prefix('/') {
        (Root::Rooted, None, stripped)
    } else if let Some(stripped) = s.strip_prefix('#') {
        let (dev, rest) = match stripped.find('/') {
            Some(i) => (&stripped[..i], &stripped[i + 1..]),
            None => (stripped, ""),
        };
        (Root::Device, Some(dev.to_owned()), rest)
    } else {
        (Root::Relative, None, s)
    };

    // A trailing slash, or a final `.`/`..` element (dropped or resolved by
    // `clean` but still present in the unprocessed path), forces must_be_dir.
    let last_segment = rest.rsplit('/').next().unwrap_or("");
    let must_be_dir = rest.ends_with('/') || last_segment == "." || last_segment == "..";

    let elements = clean(rest, matches!(root, Root::Rooted | Root::Device));

    Path { root, device, elements, must_be_dir }
}

/// Collapse `.` segments and resolve `..` the way `cleanname` does: `..`
/// pops the previous element unless the stack is empty and the path is
/// rooted (popping past `/` stays at `/`), or the previous element is
/// itself an unresolved `..`.
fn clean(rest: &str, rooted: bool) -> Vec<String> {
    let mut elements: Vec<String> = Vec::new();

    for part in rest.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                match elements.last().map(|s| s.as_str()) {
                    Some("..") => elements.push("..".to_owned()),
                    Some(_) => {
                        elements.pop();
                    }
                    None => {
                        if !rooted {
                            elements.push("..".to_owned());
                        }
                        // rooted with an empty stack: ".." at the root stays put
                    }
                }
            }
            other => elements.push(other.to_owned()),
        }
    }

    elements
}

/// Serialize a parsed path back to its canonical string form.
pub fn serialize(path: &Path) -> String {
    let mut s = String::new();
    match path.root {
        Root::Rooted => s.push('/'),
        Root::Device => {
            s.push('#');
            if let Some(dev) = &path.device {
                s.push_str(dev);
            }
            s.push('/');
        }
        Root::Relative => {}
    }
    s.push_str(&path.elements.join("/"));
    if path.must_be_dir && !s.ends_with('/') {
        s.push('/');
    }
    s
}

/// Join a base path with a relative path, re-cleaning the result.
///
/// If `rel` is itself rooted or device-relative, it replaces `base`
/// entirely (the usual shell `cd` semantics for an absolute argument).
pub fn join(base: &Path, rel: &Path) -> Path {
    match rel.root {
        Root::Rooted | Root::Device => rel.clone(),
        Root::Relative => {
            let mut elements = base.elements.clone();
            for e in &rel.elements {
                if e == ".." {
                    match elements.last().map(|s| s.as_str()) {
                        Some("..") => elements.push("..".to_owned()),
                        Some(_) => {
                            elements.pop();
                        }
                        None => {
                            if !matches!(base.root, Root::Rooted | Root::Device) {
                                elements.push("..".to_owned());
                            }
                        }
                    }
                } else {
                    elements.push(e.clone());
                }
            }
            Path {
                root: base.root,
                device: base.device.clone(),
                elements,
                must_be_dir: rel.must_be_dir,
            }
        }
    }
}

/// Join a logical name list (`Cname`) onto new walk names the way the walk
/// algorithm's `PathJoin` helper does: only a *leading run* of `..` in
/// `names` pops elements off the tail of `cname` (or accumulates as leading
/// `..` once `cname` runs out). The first non-`..` name ends the collapsing
/// pass; everything after it, including any further `..`, is appended
/// verbatim with no further resolution. This is distinct from [`join`],
/// which re-cleans a whole relative path and resolves every `..` in it.
pub fn path_join(cname: &[String], names: &[String]) -> Vec<String> {
    let mut out = cname.to_vec();
    let mut rest = names.iter();
    for name in rest.by_ref() {
        if name == ".." {
            match out.last().map(|s| s.as_str()) {
                Some("..") => out.push("..".to_owned()),
                Some(_) => {
                    out.pop();
                }
                None => out.push("..".to_owned()),
            }
        } else {
            out.push(name.clone());
            break;
        }
    }
    out.extend(rest.cloned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rooted_path() {
        let p = parse("/a/b/c");
        assert_eq!(p.root, Root::Rooted);
        assert_eq!(p.elements, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_relative_path() {
        let p = parse("a/b");
        assert_eq!(p.root, Root::Relative);
        assert_eq!(p.elements, vec!["a", "b"]);
    }

    #[test]
    fn parses_empty_as_relative_cwd() {
        let p = parse("");
        assert_eq!(p.root, Root::Relative);
        assert!(p.elements.is_empty());
    }

    #[test]
    fn collapses_dot_segments() {
        let p = parse("/a/./b");
        assert_eq!(p.elements, vec!["a", "b"]);
    }

    #[test]
    fn pops_on_dotdot() {
        let p = parse("/a/b/../c");
        assert_eq!(p.elements, vec!["a", "c"]);
    }

    #[test]
    fn dotdot_at_root_stays_put() {
        let p = parse("/../a");
        assert_eq!(p.elements, vec!["a"]);
    }

    #[test]
    fn dotdot_accumulates_when_relative_and_empty() {
        let p = parse("../../a");
        assert_eq!(p.elements, vec!["..", "..", "a"]);
    }

    #[test]
    fn dotdot_does_not_pop_a_preceding_dotdot() {
        let p = parse("../../../a");
        assert_eq!(p.elements, vec!["..", "..", "..", "a"]);
    }

    #[test]
    fn spec_vector_dotdot_slash_dot_mix() {
        let p = parse("/../test/./1/a/..//../4/5/./");
        assert_eq!(p.root, Root::Rooted);
        assert!(p.must_be_dir);
        assert_eq!(p.elements, owned(&["test", "4", "5"]));
    }

    #[test]
    fn spec_vector_relative_accumulating_dotdot() {
        let p = parse("../test/../../1");
        assert_eq!(p.root, Root::Relative);
        assert!(!p.must_be_dir);
        assert_eq!(p.elements, owned(&["..", "..", "1"]));
    }

    #[test]
    fn spec_vector_trailing_dotdot_with_no_slash_is_must_be_dir() {
        let p = parse("/test/../../../12/../.././../..////../..");
        assert_eq!(p.root, Root::Rooted);
        assert!(p.must_be_dir);
        assert!(p.elements.is_empty());
    }

    #[test]
    fn parses_device_path() {
        let p = parse("#srv/foo");
        assert_eq!(p.root, Root::Device);
        assert_eq!(p.device.as_deref(), Some("srv"));
        assert_eq!(p.elements, vec!["foo"]);
    }

    #[test]
    fn serialize_round_trips_rooted() {
        let p = parse("/a/b/c");
        assert_eq!(serialize(&p), "/a/b/c");
    }

    #[test]
    fn must_be_dir_tracked() {
        let p = parse("/a/b/");
        assert!(p.must_be_dir);
        assert_eq!(serialize(&p), "/a/b/");
    }

    #[test]
    fn join_relative_onto_rooted_base() {
        let base = parse("/a/b");
        let rel = parse("../c");
        let joined = join(&base, &rel);
        assert_eq!(joined.elements, vec!["a", "c"]);
    }

    #[test]
    fn join_absolute_rel_replaces_base() {
        let base = parse("/a/b");
        let rel = parse("/x/y");
        let joined = join(&base, &rel);
        assert_eq!(joined.root, Root::Rooted);
        assert_eq!(joined.elements, vec!["x", "y"]);
    }

    fn owned(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn path_join_leading_dotdot_pops_cname() {
        let cname = owned(&["a", "ha", "r"]);
        let names = owned(&["..", "..", "c"]);
        assert_eq!(path_join(&cname, &names), owned(&["a", "c"]));
    }

    #[test]
    fn path_join_onto_empty_cname() {
        let cname: Vec<String> = Vec::new();
        let names = owned(&["ra"]);
        assert_eq!(path_join(&cname, &names), owned(&["ra"]));
    }

    #[test]
    fn path_join_only_collapses_leading_dotdot_run() {
        let cname = owned(&["..", "r"]);
        let names = owned(&["bling", "..", "c"]);
        assert_eq!(path_join(&cname, &names), owned(&["..", "r", "bling", "..", "c"]));
    }
}
