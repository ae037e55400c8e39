//! The embeddable interpreter facade.
//!
//! A host constructs an [`Interpreter`], registers externals against it, and
//! evaluates source text or files. One instance owns its globals, literal
//! pool, resolver distance map, node-id generator, and evaluated-files set;
//! AST nodes are never shared between instances. Evaluation is synchronous
//! and single-threaded; native callbacks receive `&mut Interpreter` and may
//! re-enter through [`Interpreter::invoke`].

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::ast::{LiteralPool, NodeId, NodeIdGen, TypeExpr};
use crate::builtins;
use crate::externs::{ExternalFunction, ExternalNamespace};
use crate::lexer;
use crate::lexicon::EXTERNAL_PREFIX;
use crate::namespace::{Declaration, Namespace, NamespaceRef};
use crate::parser::{self, ParseStyle};
use crate::resolver;
use crate::token::Span;
use crate::value::{Function, Value};

pub mod error;
mod runtime;

use error::RuntimeError;
use runtime::Flow;

pub type FileReader = Box<dyn Fn(&Path) -> io::Result<String>>;

/// Host-facing construction options.
pub struct InterpreterConfig {
    /// Base directory `import` paths and `eval_file` resolve against.
    pub working_directory: PathBuf,
    /// Raises interpreter tracing through the `log` facade.
    pub debug: bool,
    /// How source text is read; swap this to serve files from memory or to
    /// adapt an async host.
    pub file_reader: FileReader,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("."),
            debug: false,
            file_reader: Box::new(|path| std::fs::read_to_string(path)),
        }
    }
}

/// Per-evaluation options; `Default` is library style with no invocation.
#[derive(Default)]
pub struct EvalOptions {
    /// Name used in diagnostics; defaults to `<script>`.
    pub file_name: Option<String>,
    pub style: ParseStyle,
    /// Namespace the statements execute in; defaults to globals.
    pub context: Option<NamespaceRef>,
    /// Evaluated under this library namespace name (bound in globals).
    pub library_name: Option<String>,
    /// Function to invoke after loading, library style only.
    pub invoke: Option<String>,
    /// Positional arguments for `invoke`.
    pub args: Vec<Value>,
}

pub struct Interpreter {
    config: InterpreterConfig,
    globals: NamespaceRef,
    /// Current-namespace pointer; saved and restored around activations.
    context: NamespaceRef,
    pool: LiteralPool,
    distances: HashMap<NodeId, usize>,
    ids: NodeIdGen,
    evaluated_files: HashMap<String, NamespaceRef>,
    external_namespaces: HashMap<String, Rc<dyn ExternalNamespace>>,
    initialized: bool,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        let globals = Namespace::root("global");
        builtins::register_core_externals(&globals);
        Self {
            config,
            context: Rc::clone(&globals),
            globals,
            pool: LiteralPool::new(),
            distances: HashMap::new(),
            ids: NodeIdGen::new(),
            evaluated_files: HashMap::new(),
            external_namespaces: HashMap::new(),
            initialized: false,
        }
    }

    /// Evaluates the core library. Runs once; every `eval`-family entry
    /// point calls it implicitly, so hosts only need it when they want to
    /// override core bindings first.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;
        log::debug!("evaluating core library");
        self.run_source(
            builtins::CORE_LIBRARY,
            "<core>",
            ParseStyle::Library,
            None,
        )?;
        Ok(())
    }

    /// Evaluates source in library style and returns the last statement's
    /// value.
    pub fn eval(&mut self, source: &str) -> Result<Value> {
        self.eval_with(source, EvalOptions::default())
    }

    pub fn eval_with(&mut self, source: &str, options: EvalOptions) -> Result<Value> {
        self.init()?;
        let file_name = options
            .file_name
            .unwrap_or_else(|| "<script>".to_string());
        let context = match &options.library_name {
            Some(name) => Some(self.bind_library_namespace(name)),
            None => options.context,
        };
        let value = self.run_source(source, &file_name, options.style, context)?;
        match options.invoke {
            Some(function) => self.invoke(&function, &options.args),
            None => Ok(value),
        }
    }

    /// Reads a file through the configured reader (relative paths resolve
    /// against the working directory), registers it as evaluated, and
    /// evaluates it.
    pub fn eval_file(&mut self, path: impl AsRef<Path>, options: EvalOptions) -> Result<Value> {
        self.init()?;
        let full_path = self.config.working_directory.join(path.as_ref());
        let source = (self.config.file_reader)(&full_path)
            .with_context(|| format!("Reading {}", full_path.display()))?;
        let file_name = options
            .file_name
            .clone()
            .unwrap_or_else(|| full_path.to_string_lossy().to_string());
        let target = match &options.library_name {
            Some(name) => Some(self.bind_library_namespace(name)),
            None => options.context.clone(),
        };
        self.evaluated_files.insert(
            full_path.to_string_lossy().to_string(),
            target.clone().unwrap_or_else(|| Rc::clone(&self.globals)),
        );
        let value = self.run_source(&source, &file_name, options.style, target)?;
        match options.invoke {
            Some(function) => self.invoke(&function, &options.args),
            None => Ok(value),
        }
    }

    /// Calls a script function by name. Errors are reported through the log
    /// facade and returned.
    pub fn invoke(&mut self, function: &str, args: &[Value]) -> Result<Value> {
        self.init()?;
        let result = self
            .fetch_global(function)
            .and_then(|callee| {
                self.call_value(callee, args.to_vec(), HashMap::new(), Span::default())
            })
            .with_context(|| format!("Invoking '{function}'"));
        if let Err(error) = &result {
            log::error!("invoke failed: {error:#}");
        }
        result
    }

    /// Calls a static method of a class, `invoke` semantics otherwise.
    pub fn invoke_static(&mut self, class: &str, function: &str, args: &[Value]) -> Result<Value> {
        self.init()?;
        let result = self
            .fetch_global(class)
            .and_then(|class_value| {
                let method = self.member_get(class_value, function, Span::default())?;
                self.call_value(method, args.to_vec(), HashMap::new(), Span::default())
            })
            .with_context(|| format!("Invoking '{class}.{function}'"));
        if let Err(error) = &result {
            log::error!("invoke failed: {error:#}");
        }
        result
    }

    /// Defines (or replaces) a global binding from the host.
    pub fn define_global(&mut self, name: &str, value: Value, mutable: bool) {
        let declared_type = TypeExpr::named(value.type_name());
        self.globals
            .borrow_mut()
            .overwrite(name, Declaration::new(value, declared_type, mutable));
    }

    /// Merges host callbacks into the extern table. Entries registered
    /// before `init` override the core library's own bindings.
    pub fn load_external_functions(&mut self, functions: HashMap<String, ExternalFunction>) {
        for (name, callback) in functions {
            let entry = format!("{EXTERNAL_PREFIX}{name}");
            let function = Function::native(name, callback);
            self.globals.borrow_mut().overwrite(
                &entry,
                Declaration::new(
                    Value::Function(Rc::new(function)),
                    TypeExpr::named(crate::lexicon::TYPE_FUNCTION),
                    false,
                ),
            );
        }
    }

    /// Registers the host object backing an `external class` of the same
    /// name. Must happen before the declaration is evaluated.
    pub fn bind_external_namespace(&mut self, name: &str, namespace: Rc<dyn ExternalNamespace>) {
        self.external_namespaces.insert(name.to_string(), namespace);
    }

    pub fn globals(&self) -> NamespaceRef {
        Rc::clone(&self.globals)
    }

    /// Names of every file already evaluated by this instance.
    pub fn evaluated_files(&self) -> HashSet<String> {
        self.evaluated_files.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    fn run_source(
        &mut self,
        source: &str,
        file_name: &str,
        style: ParseStyle,
        context: Option<NamespaceRef>,
    ) -> Result<Value> {
        if self.config.debug {
            log::debug!("evaluating {file_name} ({} bytes)", source.len());
        }
        let tokens =
            lexer::tokenize(source).with_context(|| format!("Lexing {file_name}"))?;
        let statements = parser::parse_tokens(tokens, &mut self.pool, &mut self.ids, style)
            .with_context(|| format!("Parsing {file_name}"))?;
        resolver::resolve(&statements, &mut self.distances)
            .with_context(|| format!("Resolving {file_name}"))?;

        let saved = Rc::clone(&self.context);
        self.context = context.unwrap_or_else(|| Rc::clone(&self.globals));
        let result = self.exec_sequence(&statements);
        self.context = saved;

        let flow = result.with_context(|| format!("Evaluating {file_name}"))?;
        match flow {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
            Flow::Break(span) => Err(RuntimeError::BreakOutsideLoop {
                line: span.line,
                column: span.column,
            })
            .with_context(|| format!("Evaluating {file_name}")),
            Flow::Continue(span) => Err(RuntimeError::ContinueOutsideLoop {
                line: span.line,
                column: span.column,
            })
            .with_context(|| format!("Evaluating {file_name}")),
        }
    }

    fn bind_library_namespace(&mut self, name: &str) -> NamespaceRef {
        let namespace = Namespace::child(&self.globals, name);
        self.globals.borrow_mut().overwrite(
            name,
            Declaration::new(
                Value::Namespace(Rc::clone(&namespace)),
                TypeExpr::named(crate::lexicon::TYPE_NAMESPACE),
                false,
            ),
        );
        namespace
    }

    fn fetch_global(&self, name: &str) -> Result<Value, RuntimeError> {
        crate::namespace::fetch(&self.globals, name, Span::default())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(InterpreterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::externs::external_fn;
    use indoc::indoc;
    use std::cell::RefCell;

    /// Interpreter with `print` captured into a shared buffer, the way a
    /// host overrides any core binding: register before init.
    fn capturing_interpreter() -> (Interpreter, Rc<RefCell<Vec<String>>>) {
        let mut interpreter = Interpreter::new(InterpreterConfig::default());
        let printed = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&printed);
        let mut externals = HashMap::new();
        externals.insert(
            "print".to_string(),
            external_fn(move |_, _, args, _| {
                let line = args
                    .iter()
                    .map(Value::to_output)
                    .collect::<Vec<_>>()
                    .join(" ");
                sink.borrow_mut().push(line);
                Ok(Value::Null)
            }),
        );
        interpreter.load_external_functions(externals);
        (interpreter, printed)
    }

    fn run_main(source: &str) -> Vec<String> {
        let (mut interpreter, printed) = capturing_interpreter();
        interpreter.eval(source).expect("eval failed");
        interpreter.invoke("main", &[]).expect("invoke failed");
        let lines = printed.borrow().clone();
        lines
    }

    fn eval_fragment(source: &str) -> Result<Value> {
        let (mut interpreter, _) = capturing_interpreter();
        interpreter.eval_with(
            source,
            EvalOptions {
                style: ParseStyle::Function,
                ..EvalOptions::default()
            },
        )
    }

    fn expect_runtime_error(result: Result<Value>) -> RuntimeError {
        result
            .expect_err("expected evaluation failure")
            .downcast::<RuntimeError>()
            .expect("expected RuntimeError")
    }

    #[test]
    fn evaluates_arithmetic_on_globals() {
        let lines = run_main("var year = 2020 proc main { print(year + 21) }");
        assert_eq!(lines, vec!["2041"]);
    }

    #[test]
    fn constructs_class_and_dispatches_method() {
        let source = indoc! {"
            class C {
              var x
              construct(v: num) {
                this.x = v
              }
              fun twice: num {
                return x * 2
              }
            }
            proc main {
              var c = C(7)
              print(c.twice())
            }
        "};
        assert_eq!(run_main(source), vec!["14"]);
    }

    #[test]
    fn closures_capture_their_declaration_context() {
        let source = indoc! {"
            fun make(): fun {
              var n = 0
              fun step: num {
                n = n + 1
                return n
              }
              return step
            }
            proc main {
              var s = make()
              print(s())
              print(s())
              print(s())
            }
        "};
        assert_eq!(run_main(source), vec!["1", "2", "3"]);
    }

    #[test]
    fn for_in_iterates_a_list() {
        let source = indoc! {"
            proc main {
              var xs = [10, 20, 30]
              var sum = 0
              for (var x in xs) {
                sum = sum + x
              }
              print(sum)
            }
        "};
        assert_eq!(run_main(source), vec!["60"]);
    }

    #[test]
    fn subclass_method_overrides_superclass() {
        let source = indoc! {"
            class A {
              fun hi {
                print('A')
              }
            }
            class B extends A {
              fun hi {
                print('B')
              }
            }
            proc main {
              var b = B()
              b.hi()
            }
        "};
        assert_eq!(run_main(source), vec!["B"]);
    }

    #[test]
    fn superclass_instance_variables_exist_on_subclass_instances() {
        let source = indoc! {"
            class A {
              var from_a = 1
            }
            class B extends A {
              var from_b = 2
            }
            proc main {
              var b = B()
              print(b.from_a + b.from_b)
            }
        "};
        assert_eq!(run_main(source), vec!["3"]);
    }

    #[test]
    fn subclass_inherits_superclass_methods() {
        let source = indoc! {"
            class A {
              fun hi {
                print('A')
              }
            }
            class B extends A { }
            proc main {
              B().hi()
            }
        "};
        assert_eq!(run_main(source), vec!["A"]);
    }

    #[test]
    fn string_concatenation_and_number_addition() {
        assert_eq!(
            eval_fragment("'ab' + 'cd'").expect("eval failed"),
            Value::String("abcd".to_string())
        );
        assert_eq!(
            eval_fragment("1 + 2").expect("eval failed"),
            Value::Number(3.0)
        );
    }

    #[test]
    fn mixed_addition_is_an_undefined_operator() {
        let error = expect_runtime_error(eval_fragment("'a' + 1"));
        assert!(matches!(error, RuntimeError::UndefinedOperator { op, .. } if op == "+"));
    }

    #[test]
    fn immutable_binding_rejects_reassignment() {
        let error = expect_runtime_error(eval_fragment("let a = 1  a = 2"));
        assert_eq!(
            error,
            RuntimeError::ImmutableWrite {
                name: "a".to_string(),
                line: 1,
                column: 12
            }
        );
    }

    #[test]
    fn undefined_identifier_fails() {
        let error = expect_runtime_error(eval_fragment("missing"));
        assert!(matches!(error, RuntimeError::UndefinedIdentifier { name, .. } if name == "missing"));
    }

    #[test]
    fn conditions_must_be_boolean() {
        let error = expect_runtime_error(eval_fragment("if (1) { }"));
        assert!(matches!(error, RuntimeError::ConditionNotBoolean { type_name, .. } if type_name == "num"));
    }

    #[test]
    fn logical_operators_short_circuit() {
        // `missing` would fail if evaluated; short-circuit skips it.
        assert_eq!(
            eval_fragment("false && missing").expect("eval failed"),
            Value::Boolean(false)
        );
        assert_eq!(
            eval_fragment("true || missing").expect("eval failed"),
            Value::Boolean(true)
        );
    }

    #[test]
    fn is_compares_runtime_class_names() {
        let source = indoc! {"
            class A { }
            class B extends A { }
            proc main {
              print([1] is List)
              print(1 is num)
              print(1 is bool)
              print(B() is B)
              print(B() is A)
            }
        "};
        assert_eq!(run_main(source), vec!["true", "true", "false", "true", "false"]);
    }

    #[test]
    fn break_and_continue_control_loops() {
        let source = indoc! {"
            proc main {
              var i = 0
              var total = 0
              while (i < 10) {
                i = i + 1
                if (i % 2 == 0) {
                  continue
                }
                if (i > 6) {
                  break
                }
                total = total + i
              }
              print(total)
            }
        "};
        // 1 + 3 + 5
        assert_eq!(run_main(source), vec!["9"]);
    }

    #[test]
    fn optional_and_named_parameters_take_defaults() {
        let source = indoc! {"
            proc describe(name, [suffix = '!'], {count: num = 1}) {
              print(name + suffix, count)
            }
            proc main {
              describe('a')
              describe('b', '?')
              describe('c', count: 3)
            }
        "};
        let lines = run_main(source);
        assert_eq!(lines, vec!["a! 1", "b? 1", "c! 3"]);
    }

    #[test]
    fn variadic_function_binds_whole_argument_list() {
        let source = indoc! {"
            fun tally(...): num {
              var total = 0
              for (var n in arguments) {
                total = total + n
              }
              return total
            }
            proc main {
              print(tally(1, 2, 3, 4))
            }
        "};
        assert_eq!(run_main(source), vec!["10"]);
    }

    #[test]
    fn missing_positional_argument_is_an_arity_mismatch() {
        let source = "fun f(a, b) { }";
        let (mut interpreter, _) = capturing_interpreter();
        interpreter.eval(source).expect("eval failed");
        let error = interpreter
            .invoke("f", &[Value::Number(1.0)])
            .expect_err("expected arity failure")
            .downcast::<RuntimeError>()
            .expect("expected RuntimeError");
        assert!(matches!(
            error,
            RuntimeError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn unknown_named_argument_fails() {
        let error = expect_runtime_error(eval_fragment(
            "fun f({a: num = 1}) { }  f(b: 2)",
        ));
        assert!(matches!(
            error,
            RuntimeError::UnknownNamedArgument { name, .. } if name == "b"
        ));
    }

    #[test]
    fn static_members_and_getters_dispatch_on_the_class() {
        let source = indoc! {"
            class Counter {
              static var count = 0
              static fun bump {
                count = count + 1
              }
              static get doubled: num {
                return count * 2
              }
            }
            proc main {
              Counter.bump()
              Counter.bump()
              print(Counter.count)
              print(Counter.doubled)
            }
        "};
        assert_eq!(run_main(source), vec!["2", "4"]);
    }

    #[test]
    fn instance_getters_and_setters_wrap_a_field() {
        let source = indoc! {"
            class Box {
              var stored = 0
              get value: num {
                return stored
              }
              set value(v) {
                this.stored = v * 10
              }
            }
            proc main {
              var b = Box()
              b.value = 4
              print(b.value)
            }
        "};
        assert_eq!(run_main(source), vec!["40"]);
    }

    #[test]
    fn constructor_returns_the_instance_even_with_bare_return() {
        let source = indoc! {"
            class C {
              var x = 1
              construct {
                return
              }
            }
            proc main {
              var c = C()
              print(c.x)
            }
        "};
        assert_eq!(run_main(source), vec!["1"]);
    }

    #[test]
    fn subscript_reads_and_writes_lists_and_maps() {
        let source = indoc! {"
            proc main {
              var xs = [1, 2, 3]
              xs[1] = 9
              print(xs[1])
              var m = {'a': 1}
              m['b'] = 2
              print(m['a'] + m['b'])
              print(m['missing'])
            }
        "};
        assert_eq!(run_main(source), vec!["9", "3", "null"]);
    }

    #[test]
    fn list_index_out_of_range_fails() {
        let error = expect_runtime_error(eval_fragment("var xs = [1]  xs[3]"));
        assert!(matches!(
            error,
            RuntimeError::IndexOutOfRange { index: 3, len: 1, .. }
        ));
    }

    #[test]
    fn wrapper_methods_mutate_the_underlying_list() {
        let source = indoc! {"
            proc main {
              var xs = []
              xs.add(1, 2)
              xs.add(3)
              print(xs.length)
              print(xs.contains(2))
              xs.removeAt(0)
              print(xs)
            }
        "};
        assert_eq!(run_main(source), vec!["3", "true", "[2, 3]"]);
    }

    #[test]
    fn map_wrapper_exposes_keys_and_membership() {
        let source = indoc! {"
            proc main {
              var m = {'a': 1, 'b': 2}
              print(m.length)
              print(m.containsKey('a'))
              print(m.keys())
            }
        "};
        assert_eq!(run_main(source), vec!["2", "true", "[a, b]"]);
    }

    #[test]
    fn same_literal_evaluates_to_identical_values() {
        let (mut interpreter, _) = capturing_interpreter();
        let first = interpreter
            .eval_with(
                "42",
                EvalOptions {
                    style: ParseStyle::Function,
                    ..EvalOptions::default()
                },
            )
            .expect("eval failed");
        let second = interpreter
            .eval_with(
                "42",
                EvalOptions {
                    style: ParseStyle::Function,
                    ..EvalOptions::default()
                },
            )
            .expect("eval failed");
        assert_eq!(first, second);
        assert_eq!(first, Value::Number(42.0));
    }

    #[test]
    fn interpreter_state_persists_across_evaluations() {
        let (mut interpreter, printed) = capturing_interpreter();
        interpreter
            .eval("var shared = 5")
            .expect("first eval failed");
        interpreter
            .eval_with(
                "print(shared + 1)",
                EvalOptions {
                    style: ParseStyle::Function,
                    ..EvalOptions::default()
                },
            )
            .expect("second eval failed");
        assert_eq!(printed.borrow().clone(), vec!["6"]);
    }

    #[test]
    fn define_global_exposes_host_values_to_scripts() {
        let (mut interpreter, printed) = capturing_interpreter();
        interpreter.define_global("host_value", Value::Number(8.0), false);
        interpreter
            .eval("proc main { print(host_value * 2) }")
            .expect("eval failed");
        interpreter.invoke("main", &[]).expect("invoke failed");
        assert_eq!(printed.borrow().clone(), vec!["16"]);
    }

    #[test]
    fn invoke_passes_positional_arguments() {
        let (mut interpreter, _) = capturing_interpreter();
        interpreter
            .eval("fun add(a, b): num { return a + b }")
            .expect("eval failed");
        let result = interpreter
            .invoke("add", &[Value::Number(2.0), Value::Number(5.0)])
            .expect("invoke failed");
        assert_eq!(result, Value::Number(7.0));
    }

    #[test]
    fn invoke_static_calls_class_methods() {
        let source = indoc! {"
            class MathUtil {
              static fun square(n: num): num {
                return n * n
              }
            }
        "};
        let (mut interpreter, _) = capturing_interpreter();
        interpreter.eval(source).expect("eval failed");
        let result = interpreter
            .invoke_static("MathUtil", "square", &[Value::Number(6.0)])
            .expect("invoke failed");
        assert_eq!(result, Value::Number(36.0));
    }

    #[test]
    fn import_evaluates_once_and_binds_alias() {
        let files: HashMap<String, String> = HashMap::from([(
            "util.ht".to_string(),
            "var answer = 42  fun double(n): num { return n * 2 }".to_string(),
        )]);
        let reads = Rc::new(RefCell::new(0usize));
        let reads_probe = Rc::clone(&reads);
        let config = InterpreterConfig {
            working_directory: PathBuf::from(""),
            debug: false,
            file_reader: Box::new(move |path| {
                *reads_probe.borrow_mut() += 1;
                files
                    .get(&path.to_string_lossy().to_string())
                    .cloned()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
            }),
        };
        let mut interpreter = Interpreter::new(config);
        let printed = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&printed);
        interpreter.load_external_functions(HashMap::from([(
            "print".to_string(),
            external_fn(move |_, _, args: &[Value], _| {
                sink.borrow_mut()
                    .push(args.iter().map(Value::to_output).collect::<Vec<_>>().join(" "));
                Ok(Value::Null)
            }),
        )]));

        let source = indoc! {"
            import 'util.ht' as util
            import 'util.ht' as util
            proc main {
              print(util.double(util.answer))
            }
        "};
        interpreter.eval(source).expect("eval failed");
        interpreter.invoke("main", &[]).expect("invoke failed");
        assert_eq!(printed.borrow().clone(), vec!["84"]);
        assert_eq!(*reads.borrow(), 1);
    }

    #[test]
    fn eval_with_invoke_runs_after_loading() {
        let (mut interpreter, printed) = capturing_interpreter();
        let result = interpreter
            .eval_with(
                "proc main { print('ready') }",
                EvalOptions {
                    invoke: Some("main".to_string()),
                    ..EvalOptions::default()
                },
            )
            .expect("eval failed");
        assert_eq!(result, Value::Null);
        assert_eq!(printed.borrow().clone(), vec!["ready"]);
    }

    #[test]
    fn extern_callbacks_reenter_through_invoke() {
        let (mut interpreter, printed) = capturing_interpreter();
        interpreter.load_external_functions(HashMap::from([(
            "reenter".to_string(),
            external_fn(|interpreter: &mut Interpreter, _, _, _| {
                interpreter
                    .invoke("callee", &[])
                    .map_err(|error| crate::externs::ExternError::new(error.to_string()))
            }),
        )]));
        let source = indoc! {"
            external fun reenter
            fun callee: num {
              return 21
            }
            proc main {
              print(reenter() * 2)
            }
        "};
        interpreter.eval(source).expect("eval failed");
        interpreter.invoke("main", &[]).expect("invoke failed");
        assert_eq!(printed.borrow().clone(), vec!["42"]);
    }

    #[test]
    fn typeof_reports_runtime_type_names() {
        let source = indoc! {"
            proc main {
              print(typeof(1))
              print(typeof('x'))
              print(typeof([1]))
              print(typeof({'a': 1}))
            }
        "};
        assert_eq!(run_main(source), vec!["num", "String", "List", "Map"]);
    }

    #[test]
    fn missing_external_binding_is_reported() {
        let (mut interpreter, _) = capturing_interpreter();
        let error = interpreter
            .eval("external fun not_bound")
            .expect_err("expected missing binding")
            .downcast::<RuntimeError>()
            .expect("expected RuntimeError");
        assert!(matches!(
            error,
            RuntimeError::MissingExternalBinding { name, .. } if name == "not_bound"
        ));
    }
}
