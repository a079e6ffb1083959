// Path pattern matching
//
// Patterns are matched segment by segment:
//   ?        one character within a segment
//   *        zero or more characters within a segment
//   **       zero or more whole segments
//   {name}   a captured segment (or part of one); {name:regex} constrains it
//   :name    a captured whole segment

use parking_lot::RwLock;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Pattern matching primitives used by mapping descriptors.
pub trait PathMatcher: Send + Sync {
    fn is_pattern(&self, path: &str) -> bool;

    fn matches(&self, pattern: &str, path: &str) -> bool {
        self.extract_uri_template_variables(pattern, path).is_some()
    }

    /// Captured template variables, or `None` if the path does not match.
    fn extract_uri_template_variables(
        &self,
        pattern: &str,
        path: &str,
    ) -> Option<HashMap<String, String>>;
}

struct SegmentPattern {
    regex: Regex,
    variables: Vec<String>,
}

/// Ant-style matcher with a cache of compiled segment patterns.
#[derive(Default)]
pub struct AntPathMatcher {
    segment_cache: RwLock<HashMap<String, Arc<SegmentPattern>>>,
}

impl AntPathMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn match_segments(
        &self,
        pattern: &[&str],
        path: &[&str],
        vars: &mut HashMap<String, String>,
    ) -> bool {
        match pattern.split_first() {
            None => path.is_empty(),
            Some((&"**", rest)) => (0..=path.len()).any(|skip| {
                let mut attempt = vars.clone();
                if self.match_segments(rest, &path[skip..], &mut attempt) {
                    *vars = attempt;
                    true
                } else {
                    false
                }
            }),
            Some((segment, rest)) => match path.split_first() {
                Some((value, path_rest)) => {
                    self.match_segment(segment, value, vars)
                        && self.match_segments(rest, path_rest, vars)
                }
                None => false,
            },
        }
    }

    fn match_segment(&self, segment: &str, value: &str, vars: &mut HashMap<String, String>) -> bool {
        if let Some(name) = segment.strip_prefix(':') {
            vars.insert(name.to_string(), value.to_string());
            return true;
        }
        if !has_wildcards(segment) {
            return segment == value;
        }

        let Some(compiled) = self.compile_segment(segment) else {
            return false;
        };
        match compiled.regex.captures(value) {
            Some(captures) => {
                for (i, name) in compiled.variables.iter().enumerate() {
                    if let Some(m) = captures.name(&format!("v{}", i)) {
                        vars.insert(name.clone(), m.as_str().to_string());
                    }
                }
                true
            }
            None => false,
        }
    }

    fn compile_segment(&self, segment: &str) -> Option<Arc<SegmentPattern>> {
        if let Some(cached) = self.segment_cache.read().get(segment) {
            return Some(Arc::clone(cached));
        }

        let compiled = Arc::new(segment_to_regex(segment)?);
        self.segment_cache
            .write()
            .insert(segment.to_string(), Arc::clone(&compiled));
        Some(compiled)
    }

    /// Order two patterns by how specifically they match `path`.
    ///
    /// `Less` means `a` is the better match. An exact match beats any
    /// pattern, `/**` loses to everything, then patterns are ranked by the
    /// number of variables and wildcards and finally by literal length.
    pub fn compare_patterns(&self, a: &str, b: &str, path: &str) -> Ordering {
        let (a_exact, b_exact) = (a == path, b == path);
        if a_exact != b_exact {
            return if a_exact { Ordering::Less } else { Ordering::Greater };
        }

        let a_info = PatternInfo::of(a);
        let b_info = PatternInfo::of(b);
        a_info
            .catch_all
            .cmp(&b_info.catch_all)
            .then((a_info.double_wildcards > 0).cmp(&(b_info.double_wildcards > 0)))
            .then(a_info.total_count().cmp(&b_info.total_count()))
            .then(b_info.length.cmp(&a_info.length))
            .then(a_info.single_wildcards.cmp(&b_info.single_wildcards))
            .then(a_info.uri_vars.cmp(&b_info.uri_vars))
    }
}

impl PathMatcher for AntPathMatcher {
    fn is_pattern(&self, path: &str) -> bool {
        path.split('/')
            .any(|segment| segment.starts_with(':') || has_wildcards(segment))
    }

    fn extract_uri_template_variables(
        &self,
        pattern: &str,
        path: &str,
    ) -> Option<HashMap<String, String>> {
        let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut vars = HashMap::new();
        if self.match_segments(&pattern_parts, &path_parts, &mut vars) {
            Some(vars)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for AntPathMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntPathMatcher")
            .field("cached_segments", &self.segment_cache.read().len())
            .finish()
    }
}

fn has_wildcards(segment: &str) -> bool {
    segment.contains(['*', '?', '{'])
}

fn segment_to_regex(segment: &str) -> Option<SegmentPattern> {
    let mut expr = String::from("^");
    let mut variables = Vec::new();
    let mut chars = segment.char_indices();

    while let Some((start, c)) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '{' => {
                let mut depth = 1;
                let mut end = None;
                for (i, c) in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let body = &segment[start + 1..end?];
                let (name, constraint) = body.split_once(':').unwrap_or((body, ".*"));
                expr.push_str(&format!("(?P<v{}>{})", variables.len(), constraint));
                variables.push(name.to_string());
            }
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');

    Regex::new(&expr).ok().map(|regex| SegmentPattern { regex, variables })
}

#[derive(Debug, Default)]
struct PatternInfo {
    uri_vars: usize,
    single_wildcards: usize,
    double_wildcards: usize,
    length: usize,
    catch_all: bool,
}

impl PatternInfo {
    fn of(pattern: &str) -> Self {
        let mut info = PatternInfo {
            catch_all: pattern == "/**" || pattern == "**",
            ..Default::default()
        };

        for segment in pattern.split('/').filter(|s| !s.is_empty()) {
            if segment == "**" {
                info.double_wildcards += 1;
                info.length += 1;
            } else if segment.starts_with(':') {
                info.uri_vars += 1;
                info.length += 1;
            } else {
                let mut depth = 0;
                for c in segment.chars() {
                    match c {
                        '{' => {
                            if depth == 0 {
                                info.uri_vars += 1;
                                info.length += 1;
                            }
                            depth += 1;
                        }
                        '}' => depth -= 1,
                        '*' if depth == 0 => {
                            info.single_wildcards += 1;
                            info.length += 1;
                        }
                        _ if depth == 0 => info.length += 1,
                        _ => {}
                    }
                }
            }
            info.length += 1;
        }
        info
    }

    fn total_count(&self) -> usize {
        self.uri_vars + self.single_wildcards + 2 * self.double_wildcards
    }
}
