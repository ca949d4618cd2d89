use crate::extractors::js_interpreter::JsSignatureSolver;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

const SEGMENT_DELIMITER: char = '.';

/// Shape of `example`: the length of each `.`-separated segment, joined by `.`.
///
/// Inputs with the same shape share a solved transform, whatever their content.
pub fn spec_id(example: &str) -> String {
    example
        .split(SEGMENT_DELIMITER)
        .map(|segment| segment.chars().count().to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Pick the characters of `input` at `indices`, in order.
pub fn apply(input: &str, indices: &[usize]) -> Result<String> {
    let chars: Vec<char> = input.chars().collect();
    indices
        .iter()
        .map(|&index| {
            chars.get(index).copied().with_context(|| {
                format!(
                    "signature index {} out of range for input of length {}",
                    index,
                    chars.len()
                )
            })
        })
        .collect()
}

/// Render a solved transform as slice notation, e.g. `s[5:2:-1] + s[0]`.
pub fn render_indices(indices: &[usize]) -> String {
    let mut parts = Vec::new();
    let mut i = 0;
    while i < indices.len() {
        let start = indices[i];
        let step = indices
            .get(i + 1)
            .map(|&next| next as isize - start as isize)
            .filter(|step| step.abs() == 1);

        let mut j = i;
        if let Some(step) = step {
            while j + 1 < indices.len() && indices[j + 1] as isize - indices[j] as isize == step {
                j += 1;
            }
        }
        let end = indices[j];

        parts.push(match step {
            None => format!("s[{}]", start),
            Some(1) => format!("s[{}:{}]", start, end + 1),
            Some(_) if end == 0 => format!("s[{}::-1]", start),
            Some(_) => format!("s[{}:{}:-1]", start, end - 1),
        });
        i = j + 1;
    }
    parts.join(" + ")
}

/// Derives the index list that turns `example` into its decrypted form.
pub trait SignatureSolver: Send + Sync {
    fn solve(&self, example: &str) -> Result<Vec<usize>>;
}

/// Solved transforms keyed by player and input shape.
#[derive(Default)]
pub struct SignatureCache {
    entries: RwLock<HashMap<String, Arc<[usize]>>>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(player_id: &str, example: &str) -> String {
        format!("{}-{}", player_id, spec_id(example))
    }

    /// A hit skips `solver` entirely. A failed solve stores nothing.
    pub fn get_or_solve(
        &self,
        player_id: &str,
        example: &str,
        solver: &dyn SignatureSolver,
    ) -> Result<Arc<[usize]>> {
        let key = Self::key(player_id, example);
        if let Some(indices) = self.entries.read().get(&key) {
            return Ok(Arc::clone(indices));
        }

        debug!("Solving signature transform {}", key);
        let solved: Arc<[usize]> = solver.solve(example)?.into();
        debug!("{} = {}", key, render_indices(&solved));

        let mut entries = self.entries.write();
        Ok(Arc::clone(entries.entry(key).or_insert(solved)))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn export(&self) -> BTreeMap<String, Vec<usize>> {
        self.entries
            .read()
            .iter()
            .map(|(key, indices)| (key.clone(), indices.to_vec()))
            .collect()
    }

    pub fn import(&self, saved: BTreeMap<String, Vec<usize>>) {
        let mut entries = self.entries.write();
        for (key, indices) in saved {
            entries.insert(key, indices.into());
        }
    }
}

static SIG_FUNCTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"\.sig\|\|([a-zA-Z_$][\w$]*)\("#,
        r#"([a-zA-Z_$][\w$]*)\s*=\s*function\s*\([^)]*\)\s*\{[^}]*\.split\(\s*['"]\s*['"]\s*\)"#,
        r#"function\s+([a-zA-Z_$][\w$]*)\s*\([^)]*\)\s*\{[^}]*\.split\(\s*['"]\s*['"]\s*\)"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

static HELPER_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-zA-Z_$][\w$]*)\.([a-zA-Z_$][\w$]*)\(\s*[\w$]+\s*,\s*(\d+)\s*\)").unwrap()
});

static HELPER_METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-zA-Z_$][\w$]*)\s*:\s*function\s*\([^)]*\)\s*\{([^}]*)\}").unwrap()
});

/// Name of the signature function in the player JS.
pub fn find_signature_function(player_js: &str) -> Result<String> {
    SIG_FUNCTION_PATTERNS
        .iter()
        .find_map(|re| re.captures(player_js))
        .map(|captures| captures[1].to_string())
        .context("could not find signature function name")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransformOp {
    Reverse,
    /// `splice(0, n)`: drop the first `n` characters.
    Splice(usize),
    /// Swap the first character with the one at `n % len`.
    Swap(usize),
}

/// The reverse/splice/swap program of a player's signature function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformProgram {
    ops: Vec<TransformOp>,
}

impl TransformProgram {
    pub fn from_player_js(player_js: &str) -> Result<Self> {
        let name = find_signature_function(player_js)?;
        Self::from_function(player_js, &name)
    }

    fn from_function(player_js: &str, name: &str) -> Result<Self> {
        let body_re = Regex::new(&format!(
            r"(?:function\s+{name}|(?:^|[^\w$]){name}\s*=\s*function)\s*\(\s*[\w$]+\s*\)\s*\{{([^}}]*)\}}",
            name = regex::escape(name)
        ))?;
        let body = body_re
            .captures(player_js)
            .with_context(|| format!("could not find body of signature function {}", name))?
            .get(1)
            .map_or("", |m| m.as_str());

        let calls: Vec<(String, String, usize)> = HELPER_CALL_RE
            .captures_iter(body)
            .map(|c| -> Result<(String, String, usize)> {
                Ok((c[1].to_string(), c[2].to_string(), c[3].parse()?))
            })
            .collect::<Result<_>>()?;
        let Some((object, _, _)) = calls.first() else {
            anyhow::bail!("signature function {} calls no helper methods", name);
        };

        let methods = helper_methods(player_js, object)?;
        let ops = calls
            .iter()
            .map(|(_, method, arg)| -> Result<TransformOp> {
                let kind = methods
                    .get(method.as_str())
                    .with_context(|| format!("unknown helper method {}.{}", object, method))?;
                Ok(match kind {
                    HelperKind::Reverse => TransformOp::Reverse,
                    HelperKind::Splice => TransformOp::Splice(*arg),
                    HelperKind::Swap => TransformOp::Swap(*arg),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Signature program for {}: {:?}", name, ops);
        Ok(Self { ops })
    }

    /// Replay the program on the positions `0..len`.
    pub fn indices(&self, len: usize) -> Vec<usize> {
        let mut positions: Vec<usize> = (0..len).collect();
        for op in &self.ops {
            match *op {
                TransformOp::Reverse => positions.reverse(),
                TransformOp::Splice(n) => {
                    positions.drain(..n.min(positions.len()));
                }
                TransformOp::Swap(n) => {
                    if !positions.is_empty() {
                        let target = n % positions.len();
                        positions.swap(0, target);
                    }
                }
            }
        }
        positions
    }
}

impl SignatureSolver for TransformProgram {
    fn solve(&self, example: &str) -> Result<Vec<usize>> {
        Ok(self.indices(example.chars().count()))
    }
}

#[derive(Debug, Clone, Copy)]
enum HelperKind {
    Reverse,
    Splice,
    Swap,
}

fn helper_methods<'a>(player_js: &'a str, object: &str) -> Result<HashMap<&'a str, HelperKind>> {
    let object_re = Regex::new(&format!(
        r"(?s)var\s+{}\s*=\s*\{{(.*?)\}};",
        regex::escape(object)
    ))?;
    let definition = object_re
        .captures(player_js)
        .and_then(|c| c.get(1))
        .with_context(|| format!("could not find helper object {}", object))?
        .as_str();

    Ok(HELPER_METHOD_RE
        .captures_iter(definition)
        .filter_map(|c| {
            let name = c.get(1)?.as_str();
            let body = c.get(2)?.as_str();
            let kind = if body.contains("reverse") {
                HelperKind::Reverse
            } else if body.contains("splice") {
                HelperKind::Splice
            } else {
                HelperKind::Swap
            };
            Some((name, kind))
        })
        .collect())
}

/// Solves with the static program when the player JS has the common shape,
/// and falls back to running the JS.
struct PlayerSolver<'a> {
    player_js: &'a str,
}

impl SignatureSolver for PlayerSolver<'_> {
    fn solve(&self, example: &str) -> Result<Vec<usize>> {
        let name = find_signature_function(self.player_js)?;
        match TransformProgram::from_function(self.player_js, &name) {
            Ok(program) => program.solve(example),
            Err(e) => {
                debug!("Static signature program unavailable ({:#}), running player JS", e);
                JsSignatureSolver::new(self.player_js, &name).solve(example)
            }
        }
    }
}

pub struct SignatureDecrypter {
    cache: Arc<SignatureCache>,
}

impl SignatureDecrypter {
    pub fn new(cache: Arc<SignatureCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<SignatureCache> {
        &self.cache
    }

    pub fn decrypt(&self, player_id: &str, player_js: &str, signature: &str) -> Result<String> {
        let indices = self
            .cache
            .get_or_solve(player_id, signature, &PlayerSolver { player_js })?;
        apply(signature, &indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PLAYER_JS: &str = r#"
var Xy={ab:function(a){a.reverse()},
cd:function(a,b){a.splice(0,b)},
ef:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}};
var sig=function(a){a=a.split("");Xy.cd(a,2);Xy.ab(a,41);Xy.ef(a,3);return a.join("")};
"#;

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    impl SignatureSolver for Counting {
        fn solve(&self, example: &str) -> Result<Vec<usize>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("player changed");
            }
            Ok((0..example.chars().count()).rev().collect())
        }
    }

    #[test]
    fn test_spec_id_captures_shape_only() {
        assert_eq!(spec_id("ab.cde.f"), "2.3.1");
        assert_eq!(spec_id("ab.cde.f"), spec_id("xy.123.z"));
        assert_ne!(spec_id("ab.cde"), spec_id("ab.cde.f"));
        assert_ne!(spec_id("ab.cde"), spec_id("xy.123.z"));
    }

    #[test]
    fn test_apply_projects_indices() {
        assert_eq!(apply("abcdef", &[5, 0, 2]).unwrap(), "fac");
        assert_eq!(apply("abc", &[]).unwrap(), "");
        assert!(apply("abc", &[3]).is_err());
    }

    #[test]
    fn test_cache_hit_skips_solver() {
        let cache = SignatureCache::new();
        let solver = Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        };

        let first = cache.get_or_solve("p1", "ab.cde.f", &solver).unwrap();
        let second = cache.get_or_solve("p1", "xy.123.z", &solver).unwrap();
        assert_eq!(first, second);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);

        cache.get_or_solve("p2", "ab.cde.f", &solver).unwrap();
        assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_solve_is_not_cached() {
        let cache = SignatureCache::new();
        let failing = Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        assert!(cache.get_or_solve("p1", "abc", &failing).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_export_import() {
        let cache = SignatureCache::new();
        let solver = Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        cache.get_or_solve("p1", "abc", &solver).unwrap();

        let saved = cache.export();
        assert_eq!(saved.get("p1-3"), Some(&vec![2, 1, 0]));

        let restored = SignatureCache::new();
        restored.import(saved);
        let indices = restored.get_or_solve("p1", "xyz", &solver).unwrap();
        assert_eq!(&*indices, &[2, 1, 0]);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transform_program_from_player_js() {
        let program = TransformProgram::from_player_js(PLAYER_JS).unwrap();
        let indices = program.indices(10);
        assert_eq!(indices, vec![6, 8, 7, 9, 5, 4, 3, 2]);
        assert_eq!(apply("abcdefghij", &indices).unwrap(), "gihjfedc");
    }

    #[test]
    fn test_decrypter_uses_cache() {
        let decrypter = SignatureDecrypter::new(Arc::new(SignatureCache::new()));
        assert_eq!(decrypter.decrypt("p1", PLAYER_JS, "abcdefghij").unwrap(), "gihjfedc");
        assert_eq!(decrypter.decrypt("p1", "", "klmnopqrst").unwrap(), "qsrtponm");
        assert_eq!(decrypter.cache().len(), 1);
    }

    #[test]
    fn test_render_indices() {
        assert_eq!(render_indices(&[0, 1, 2, 5, 4, 3, 9]), "s[0:3] + s[5:2:-1] + s[9]");
        assert_eq!(render_indices(&[2, 1, 0]), "s[2::-1]");
        assert_eq!(
            render_indices(&[6, 8, 7, 9, 5, 4, 3, 2]),
            "s[6] + s[8:6:-1] + s[9] + s[5:1:-1]"
        );
        assert_eq!(render_indices(&[]), "");
    }
}
