use crate::extractors::signature::SignatureSolver;
use anyhow::Result;
use rquickjs::{Context, Function, Runtime, Value};
use tracing::debug;

/// First code point of the probe alphabet. Starting above Latin-1 keeps the
/// probe free of NUL and of characters player code may special-case.
const PROBE_BASE: u32 = 0x100;

/// Runs a player's signature function in QuickJS.
pub struct JsSignatureSolver {
    js_code: String,
    function_name: String,
}

impl JsSignatureSolver {
    pub fn new(js_code: &str, function_name: &str) -> Self {
        Self {
            js_code: Self::clean_js_code(js_code),
            function_name: function_name.to_string(),
        }
    }

    fn clean_js_code(js_code: &str) -> String {
        js_code.replace('\0', "")
    }

    /// Evaluate the player and call the signature function with `input`.
    pub fn call(&self, input: &str) -> Result<String> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;

        context.with(|ctx| {
            let _: Value = ctx.eval(self.js_code.as_bytes()).map_err(|e| {
                debug!("Failed to load player JS ({} bytes): {}", self.js_code.len(), e);
                anyhow::anyhow!("Failed to evaluate JavaScript: {}", e)
            })?;

            let func: Function = ctx.globals().get(self.function_name.as_str()).map_err(|e| {
                anyhow::anyhow!(
                    "Function '{}' not found in JavaScript context: {}",
                    self.function_name,
                    e
                )
            })?;

            let result: String = func.call((input,)).map_err(|e| {
                anyhow::anyhow!("Function '{}' failed: {}", self.function_name, e)
            })?;
            Ok(result)
        })
    }
}

impl SignatureSolver for JsSignatureSolver {
    /// Feed a probe of distinct characters through the function and read the
    /// output back as positions.
    fn solve(&self, example: &str) -> Result<Vec<usize>> {
        let len = example.chars().count();
        let probe = (0..len)
            .map(|i| {
                u32::try_from(i)
                    .ok()
                    .and_then(|i| char::from_u32(PROBE_BASE + i))
                    .ok_or_else(|| anyhow::anyhow!("signature too long to probe"))
            })
            .collect::<Result<String>>()?;

        let output = self.call(&probe)?;
        debug!("Probed {} with {} characters", self.function_name, len);

        output
            .chars()
            .map(|c| {
                let index = (c as u32).checked_sub(PROBE_BASE).map(|i| i as usize);
                match index {
                    Some(index) if index < len => Ok(index),
                    _ => anyhow::bail!(
                        "{} produced a character not taken from its input: {:?}",
                        self.function_name,
                        c
                    ),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::signature::{apply, TransformProgram};

    #[test]
    fn test_js_call_basic() {
        let solver = JsSignatureSolver::new(
            r#"
        function test(a) {
            return a + "world";
        }
        "#,
            "test",
        );
        assert_eq!(solver.call("hello").unwrap(), "helloworld");
    }

    #[test]
    fn test_probe_solves_inline_transform() {
        let solver = JsSignatureSolver::new(
            r#"
        function sig(s) {
            s = s.split('');
            s.reverse();
            s.splice(1, 1);
            var c = s[0];
            s[0] = s[2];
            s[2] = c;
            return s.join('');
        }
        "#,
            "sig",
        );

        let indices = solver.solve("abcdef").unwrap();
        // reverse: fedcba, drop index 1: fdcba, swap 0 and 2: cdfba
        assert_eq!(apply("abcdef", &indices).unwrap(), "cdfba");
        assert_eq!(solver.call("abcdef").unwrap(), "cdfba");
    }

    #[test]
    fn test_probe_agrees_with_static_program() {
        let player = r#"
var Xy={ab:function(a){a.reverse()},
cd:function(a,b){a.splice(0,b)},
ef:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}};
var sig=function(a){a=a.split("");Xy.cd(a,2);Xy.ab(a,41);Xy.ef(a,3);return a.join("")};
"#;
        let program = TransformProgram::from_player_js(player).unwrap();
        let solver = JsSignatureSolver::new(player, "sig");

        assert_eq!(solver.solve("abcdefghij").unwrap(), program.indices(10));
    }

    #[test]
    fn test_missing_function_is_an_error() {
        let solver = JsSignatureSolver::new("var x = 1;", "sig");
        assert!(solver.solve("abc").is_err());
    }
}
