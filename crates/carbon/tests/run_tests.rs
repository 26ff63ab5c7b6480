//! End-to-end tests: compile and run whole programs, assert on captured
//! output or on the error kind.

use carbon::{ArgSpec, Carbon, Error, ErrorKind, NativeClasses, Var};
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn run(source: &str) -> String {
    let mut carbon = Carbon::new();
    let console = carbon.capture_console();
    carbon
        .run_source("test.cb", source, vec![])
        .unwrap_or_else(|e| panic!("script failed:\n{}", e.render()));
    console.output_text()
}

fn run_err(source: &str) -> Error {
    let mut carbon = Carbon::new();
    carbon.capture_console();
    carbon
        .run_source("test.cb", source, vec![])
        .expect_err("script should have failed")
}

// ---------------------------------------------------------------------------
// The documented end-to-end scenarios
// ---------------------------------------------------------------------------

#[test]
fn arithmetic_precedence() {
    assert_eq!(run("var x = 1 + 2 * 3; print(x);"), "7\n");
}

#[test]
fn default_arguments() {
    assert_eq!(run("func f(a, b = 10) { return a + b; } print(f(5));"), "15\n");
    assert_eq!(run("func f(a, b = 10) { return a + b; } print(f(5, 1));"), "6\n");
}

#[test]
fn default_arguments_trailing_application() {
    let src = "func f(a, b = 2, c = 3) { return a * 100 + b * 10 + c; }\n\
               print(f(1)); print(f(1, 10));";
    assert_eq!(run(src), "123\n203\n");
}

#[test]
fn method_override() {
    let src = "class A { func m() { return 1; } }\n\
               class B : A { func m() { return 2; } }\n\
               print(B().m());";
    assert_eq!(run(src), "2\n");
}

#[test]
fn unnamed_enum_values() {
    assert_eq!(
        run("enum { E1, E2, E3 = 10, E4 } print(E1, E2, E3, E4);"),
        "0 1 10 11\n"
    );
}

#[test]
fn foreach_over_array() {
    assert_eq!(run("var a = [1,2,3]; foreach(v : a) { print(v); }"), "1\n2\n3\n");
}

#[test]
fn const_division_by_zero_fails_at_compile_time() {
    let err = run_err("const C = 1/0;");
    assert_eq!(err.kind, ErrorKind::ZeroDivision);
}

#[test]
fn recursive_gcd() {
    let src = "func gcd(a, b) { if (b == 0) return a; return gcd(b, a % b); }\n\
               print(gcd(48, 18));";
    assert_eq!(run(src), "6\n");
}

// ---------------------------------------------------------------------------
// Language behavior
// ---------------------------------------------------------------------------

#[test]
fn runtime_division_by_zero() {
    let err = run_err("var zero = 0; print(1 / zero);");
    assert_eq!(err.kind, ErrorKind::ZeroDivision);
}

#[test]
fn string_concat_and_mixed_add_error() {
    assert_eq!(run("print(\"a\" + \"b\");"), "ab\n");
    let err = run_err("print(\"a\" + 1);");
    assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
}

#[test]
fn int_float_promotion() {
    assert_eq!(run("print(1 + 1);"), "2\n");
    assert_eq!(run("print(1 + 1.0);"), "2.0\n");
}

#[test]
fn while_loop_with_break_continue() {
    let src = "var i = 0; var total = 0;\n\
               while (true) { i += 1; if (i > 10) break; if (i % 2 == 0) continue; total += i; }\n\
               print(total);";
    assert_eq!(run(src), "25\n");
}

#[test]
fn for_loop() {
    assert_eq!(
        run("var s = 0; for (var i = 1; i <= 4; i += 1) { s += i; } print(s);"),
        "10\n"
    );
}

#[test]
fn compound_assignments() {
    let src = "var x = 8; x += 2; x *= 3; x -= 5; x /= 5; x %= 3; print(x);";
    assert_eq!(run(src), "2\n");
}

#[test]
fn bitwise_operators() {
    assert_eq!(run("print(1 << 4, 6 & 3, 6 | 3, 6 ^ 3, ~0);"), "16 2 7 5 -1\n");
}

#[test]
fn logical_operators_short_circuit() {
    // the right operand must not run when the left decides
    let src = "var calls = 0;\n\
               func touch() { calls += 1; return true; }\n\
               var a = false && touch();\n\
               var b = true || touch();\n\
               print(calls, a, b);";
    assert_eq!(run(src), "0 false true\n");
}

#[test]
fn keyword_logic_operators() {
    assert_eq!(run("print(true and false, true or false, not true);"), "false true false\n");
}

#[test]
fn switch_statement() {
    let src = "func pick(x) { switch (x) { case 1: return \"one\"; case 2: return \"two\"; default: return \"many\"; } }\n\
               print(pick(1), pick(2), pick(3));";
    assert_eq!(run(src), "one two many\n");
}

#[test]
fn switch_duplicate_case_rejected() {
    let err = run_err("func f(x) { switch (x) { case 1: break; case 1: break; } }");
    assert_eq!(err.kind, ErrorKind::AlreadyDefined);
}

#[test]
fn else_if_chain() {
    let src = "func grade(n) { if (n > 89) return \"A\"; else if (n > 79) return \"B\"; else return \"C\"; }\n\
               print(grade(95), grade(85), grade(70));";
    assert_eq!(run(src), "A B C\n");
}

#[test]
fn map_literal_and_indexing() {
    let src = "var m = {\"a\": 1, 2: \"two\"};\n\
               print(m[\"a\"], m[2], m.size());\n\
               m[\"a\"] = 10; print(m[\"a\"]);";
    assert_eq!(run(src), "1 two 2\n10\n");
}

#[test]
fn foreach_over_map_keys() {
    let src = "var m = {\"x\": 1, \"y\": 2}; foreach(k : m) { print(k, m[k]); }";
    assert_eq!(run(src), "x 1\ny 2\n");
}

#[test]
fn array_methods_and_aliasing() {
    let src = "var a = [1, 2]; var b = a; b.push(3);\n\
               print(a.size(), a.contains(3), a.at(-1));\n\
               var c = a.copy(); c.push(4); print(a.size(), c.size());";
    assert_eq!(run(src), "3 true 3\n3 4\n");
}

#[test]
fn string_methods() {
    let src = "print(\"Hello\".upper(), \"Hello\".lower(), \"  x \".strip());\n\
               print(\"a,b,c\".split(\",\").size());\n\
               print(\"-\".join([\"x\", \"y\"]));\n\
               print(\"42\".to_int() + 1);";
    assert_eq!(run(src), "HELLO hello x\n3\nx-y\n43\n");
}

#[test]
fn builtin_type_constructors() {
    assert_eq!(
        run("print(int(\"42\"), float(2), String(7), bool(0), bool(3));"),
        "42 2.0 7 false true\n"
    );
}

#[test]
fn builtin_min_max_pow() {
    assert_eq!(run("print(min(3, 1, 2), max(3, 1, 2), pow(2, 8));"), "1 3 256.0\n");
}

#[test]
fn input_reads_scripted_lines() {
    let mut carbon = Carbon::new();
    let console = carbon.capture_console();
    console.push_input("carbon");
    carbon
        .run_source("test.cb", "print(\"hi \" + input());", vec![])
        .unwrap();
    assert_eq!(console.output_text(), "hi carbon\n");
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

#[test]
fn member_initializers_run_in_default_ctor() {
    assert_eq!(run("class P { var x = 42; } print(P().x);"), "42\n");
}

#[test]
fn constructor_and_members() {
    let src = "class Point {\n\
                 var x; var y;\n\
                 func Point(px, py) { x = px; y = py; }\n\
                 func len2() { return x * x + y * y; }\n\
               }\n\
               var p = Point(3, 4); print(p.len2(), p.x, p.y);";
    assert_eq!(run(src), "25 3 4\n");
}

#[test]
fn explicit_super_constructor() {
    let src = "class A { var v; func A(x) { v = x; } }\n\
               class B : A { func B() { super(5); } }\n\
               print(B().v);";
    assert_eq!(run(src), "5\n");
}

#[test]
fn synthesized_super_constructor() {
    let src = "class A { var v = 7; }\n\
               class B : A { }\n\
               print(B().v);";
    assert_eq!(run(src), "7\n");
}

#[test]
fn missing_super_ctor_args_is_type_error() {
    let err = run_err("class A { func A(x) { } } class B : A { } B();");
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn super_method_call() {
    let src = "class A { func m() { return 1; } }\n\
               class B : A { func m() { return super.m() + 10; } }\n\
               print(B().m());";
    assert_eq!(run(src), "11\n");
}

#[test]
fn inherited_method_resolves_through_chain() {
    let src = "class A { func hello() { return \"hi\"; } }\n\
               class B : A { }\n\
               class C : B { }\n\
               print(C().hello());";
    assert_eq!(run(src), "hi\n");
}

#[test]
fn inherited_members_are_renumbered_after_base() {
    let src = "class A { var a = 1; }\n\
               class B : A { var b = 2; func sum() { return a + b; } }\n\
               print(B().sum());";
    assert_eq!(run(src), "3\n");
}

#[test]
fn static_members_and_functions() {
    let src = "class Counter {\n\
                 static var count = 0;\n\
                 static func bump() { count += 1; return count; }\n\
               }\n\
               Counter.bump(); Counter.bump();\n\
               print(Counter.count, Counter.bump());";
    assert_eq!(run(src), "2 3\n");
}

#[test]
fn class_constants_and_enums() {
    let src = "class C {\n\
                 const K = 10;\n\
                 enum Kind { On, Off }\n\
                 func get() { return K + Kind.Off; }\n\
               }\n\
               print(C().get(), C.K, C.Kind.On);";
    assert_eq!(run(src), "11 10 0\n");
}

#[test]
fn member_shadowing_base_is_rejected() {
    let err = run_err("class A { var x; } class B : A { var x; }");
    assert_eq!(err.kind, ErrorKind::AttributeError);
}

#[test]
fn inheritance_cycle_is_rejected() {
    let err = run_err("class A : B { } class B : A { }");
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn calling_method_without_instance_fails() {
    let err = run_err("class A { func m() { return 1; } } A.m();");
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn instance_member_indexing_is_stable() {
    let mut carbon = Carbon::new();
    let module = carbon
        .compile("test.cb", "class P { var a; var b; var c; }")
        .unwrap();
    let class = module.get_class("P").unwrap();
    assert_eq!(class.member_index_of("a").unwrap(), 0);
    assert_eq!(class.member_index_of("b").unwrap(), 1);
    assert_eq!(class.member_index_of("c").unwrap(), 2);
    assert_eq!(class.member_count, 3);
}

#[test]
fn object_iteration_protocol() {
    let src = "class Range {\n\
                 var n; var i = 0;\n\
                 func Range(count) { n = count; }\n\
                 func __iter_begin() { return this; }\n\
                 func __iter_has_next() { return i < n; }\n\
                 func __iter_next() { i += 1; return i; }\n\
               }\n\
               foreach(v : Range(3)) { print(v); }";
    assert_eq!(run(src), "1\n2\n3\n");
}

#[test]
fn callable_objects() {
    let src = "class Adder {\n\
                 var base;\n\
                 func Adder(b) { base = b; }\n\
                 func __call(x) { return base + x; }\n\
               }\n\
               var add5 = Adder(5); print(add5(3));";
    assert_eq!(run(src), "8\n");
}

#[test]
fn operator_overloads_dispatch_to_dunders() {
    let src = "class Vec2 {\n\
                 var x; var y;\n\
                 func Vec2(vx, vy) { x = vx; y = vy; }\n\
                 func __add(other) { return Vec2(x + other.x, y + other.y); }\n\
                 func __sub(other) { return Vec2(x - other.x, y - other.y); }\n\
                 func __mul(s) { return Vec2(x * s, y * s); }\n\
               }\n\
               var v = Vec2(1, 2) + Vec2(3, 4);\n\
               print(v.x, v.y);\n\
               var w = (v - Vec2(1, 1)) * 2;\n\
               print(w.x, w.y);";
    assert_eq!(run(src), "4 6\n6 10\n");
}

#[test]
fn operator_without_dunder_is_not_supported() {
    let err = run_err("class A { } var x = A() + 1;");
    assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
}

#[test]
fn equality_and_ordering_dunders() {
    let src = "class Money {\n\
                 var cents;\n\
                 func Money(c) { cents = c; }\n\
                 func __eq(other) { return cents == other.cents; }\n\
                 func __lt(other) { return cents < other.cents; }\n\
               }\n\
               print(Money(100) == Money(100), Money(100) == Money(50));\n\
               print(Money(50) < Money(100), Money(100) <= Money(100), Money(100) > Money(50));";
    assert_eq!(run(src), "true false\ntrue true true\n");
}

#[test]
fn equality_defaults_to_identity() {
    let src = "class A { }\n\
               var a = A(); var b = a;\n\
               print(a == b, a == A());";
    assert_eq!(run(src), "true false\n");
}

#[test]
fn hash_dunder_makes_instances_map_keys() {
    let src = "class Key {\n\
                 var id;\n\
                 func Key(i) { id = i; }\n\
                 func __hash() { return id; }\n\
               }\n\
               var k = Key(7);\n\
               var m = {};\n\
               m[k] = \"found\";\n\
               print(m[k], k.hash() == k.hash());";
    assert_eq!(run(src), "found true\n");
}

#[test]
fn instance_without_hash_dunder_is_not_a_map_key() {
    let err = run_err("class A { } var m = {}; m[A()] = 1;");
    assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
}

#[test]
fn mapped_index_dunders() {
    let src = "class Grid {\n\
                 var cells = {};\n\
                 func __get_mapped(key) { return cells[key]; }\n\
                 func __set_mapped(key, value) { cells[key] = value * 10; }\n\
               }\n\
               var g = Grid();\n\
               g[3] = 4;\n\
               print(g[3]);";
    assert_eq!(run(src), "40\n");
}

#[test]
fn to_string_override_wins_over_universal_default() {
    let src = "class Point {\n\
                 var x;\n\
                 func Point(px) { x = px; }\n\
                 func to_string() { return \"Point(\" + String(x) + \")\";  }\n\
               }\n\
               print(Point(3).to_string());\n\
               class Plain { }\n\
               print(Plain().to_string() == \"[Plain instance]\");";
    assert_eq!(run(src), "Point(3)\ntrue\n");
}

// ---------------------------------------------------------------------------
// Errors and limits
// ---------------------------------------------------------------------------

#[test]
fn name_error_for_unknown_identifier() {
    let err = run_err("print(missing);");
    assert_eq!(err.kind, ErrorKind::NameError);
}

#[test]
fn invalid_arg_count_at_compile_time() {
    let err = run_err("func f(a) { return a; } f(1, 2);");
    assert_eq!(err.kind, ErrorKind::InvalidArgCount);
}

#[test]
fn assertion_failure() {
    let err = run_err("const C = 1; __assert(C == 2);");
    assert_eq!(err.kind, ErrorKind::Assertion);
}

#[test]
fn assert_passes_quietly() {
    assert_eq!(run("__assert(1 + 1 == 2); print(\"ok\");"), "ok\n");
}

#[test]
fn compile_time_pseudo_functions() {
    assert_eq!(run("func f() { return __func(); } print(f(), __line());"), "f 1\n");
}

#[test]
fn stack_overflow_on_unbounded_recursion() {
    let err = run_err("func r() { return r(); } r();");
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

#[test]
fn runtime_error_carries_traceback() {
    let src = "var zero = 0;\n\
               func inner() { return 1 / zero; }\n\
               func outer() { return inner(); }\n\
               outer();";
    let err = run_err(src);
    assert_eq!(err.kind, ErrorKind::ZeroDivision);
    let names: Vec<&str> = err.traceback.iter().map(|f| f.function.as_str()).collect();
    assert!(names.contains(&"inner"));
    assert!(names.contains(&"outer"));
    let rendered = err.render();
    assert!(rendered.starts_with("ERROR(ZeroDivision)"));
}

#[test]
fn parameters_are_passed_by_reference() {
    // assigning to a parameter writes through to the caller's variable
    let src = "func bump(a) { a = a + 1; } var x = 1; bump(x); print(x);";
    assert_eq!(run(src), "2\n");
}

#[test]
fn warnings_do_not_abort() {
    let mut carbon = Carbon::new();
    let console = carbon.capture_console();
    carbon
        .run_source("test.cb", "func f() { var x = 1; 1 + 1; return x; } print(f());", vec![])
        .unwrap();
    assert_eq!(console.output_text(), "1\n");
    let warnings = carbon.take_warnings();
    assert!(warnings
        .iter()
        .any(|w| w.kind == ErrorKind::StandAloneExpression));
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

#[test]
fn imported_module_functions_and_constants() {
    let mut carbon = Carbon::new();
    let console = carbon.capture_console();
    carbon
        .compile("lib.cb", "const VERSION = 3; func twice(x) { return 2 * x; }")
        .unwrap();
    carbon
        .run_source(
            "main.cb",
            "import lib = \"lib.cb\"; print(lib.twice(21), lib.VERSION);",
            vec![],
        )
        .unwrap();
    assert_eq!(console.output_text(), "42 3\n");
}

#[test]
fn import_through_loader() {
    let mut carbon = Carbon::new();
    let console = carbon.capture_console();
    carbon.set_module_loader(Rc::new(|path: &str| {
        assert_eq!(path, "util.cb");
        Ok("func half(x) { return x / 2; }".to_string())
    }));
    carbon
        .run_source("main.cb", "import util = \"util.cb\"; print(util.half(10));", vec![])
        .unwrap();
    assert_eq!(console.output_text(), "5\n");
}

#[test]
fn extern_class_inheritance() {
    let mut carbon = Carbon::new();
    let console = carbon.capture_console();
    carbon
        .compile("base.cb", "class Shape { func kind() { return \"shape\"; } }")
        .unwrap();
    carbon
        .run_source(
            "main.cb",
            "import base = \"base.cb\";\n\
             class Circle : Shape { func r() { return 1; } }\n\
             var c = Circle(); print(c.kind(), c.r());",
            vec![],
        )
        .unwrap();
    assert_eq!(console.output_text(), "shape 1\n");
}

// ---------------------------------------------------------------------------
// Native classes
// ---------------------------------------------------------------------------

fn greeter_registry() -> NativeClasses {
    let mut registry = NativeClasses::new();
    registry.class("Greeter", |c| {
        c.ctor(ArgSpec::with_defaults(1, vec![Var::from("hello")]), |_vm, args| {
            let word = args[0].as_str().unwrap_or("hello").to_string();
            Ok(Var::Object(std::rc::Rc::new(Greeter { word })))
        });
        c.method("greet", ArgSpec::exact(1), |_vm, this, args| {
            let greeter = this
                .as_object::<Greeter>()
                .ok_or_else(|| Error::new(ErrorKind::TypeError, "expected a Greeter."))?;
            let name = args[0].as_str().unwrap_or("world");
            Ok(Var::String(format!("{} {}", greeter.word, name)))
        });
        c.static_func("version", ArgSpec::exact(0), |_vm, _args| Ok(Var::Int(2)));
        c.constant("DEFAULT", Var::from("hello"));
        c.enumeration("Tone", vec![("CASUAL", 0), ("FORMAL", 1)]);
    });
    registry
}

struct Greeter {
    word: String,
}

impl carbon::Object for Greeter {
    fn class_name(&self) -> String {
        "Greeter".to_string()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn call_method(
        &self,
        vm: &carbon::Vm,
        this: &Var,
        name: &str,
        args: &mut [Var],
    ) -> carbon::Result<Var> {
        vm.registry().call_method_on(vm, this, "Greeter", name, args)
    }
}

#[test]
fn native_class_construction_and_methods() {
    let mut carbon = Carbon::with_natives(greeter_registry());
    let console = carbon.capture_console();
    carbon
        .run_source(
            "test.cb",
            "var g = Greeter(); print(g.greet(\"carbon\"));\n\
             var h = Greeter(\"yo\"); print(h.greet(\"you\"));\n\
             print(Greeter.version(), Greeter.DEFAULT, Greeter.FORMAL);",
            vec![],
        )
        .unwrap();
    assert_eq!(console.output_text(), "hello carbon\nyo you\n2 hello 1\n");
}

#[test]
fn script_class_inheriting_native() {
    let mut carbon = Carbon::with_natives(greeter_registry());
    let console = carbon.capture_console();
    carbon
        .run_source(
            "test.cb",
            "class Polite : Greeter {\n\
               func Polite() { super(\"good day\"); }\n\
               func address(name) { return greet(name) + \"!\"; }\n\
             }\n\
             print(Polite().address(\"madam\"));",
            vec![],
        )
        .unwrap();
    assert_eq!(console.output_text(), "good day madam!\n");
}

#[test]
fn native_ctor_arg_count_checked_at_compile_time() {
    let mut carbon = Carbon::with_natives(greeter_registry());
    let err = carbon
        .run_source("test.cb", "Greeter(\"a\", \"b\");", vec![])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgCount);
}

// ---------------------------------------------------------------------------
// main()
// ---------------------------------------------------------------------------

#[test]
fn main_function_runs_after_module_init() {
    let src = "var greeting = \"hi\";\n\
               func main() { print(greeting); }";
    assert_eq!(run(src), "hi\n");
}

#[test]
fn main_receives_script_arguments() {
    let mut carbon = Carbon::new();
    let console = carbon.capture_console();
    carbon
        .run_source(
            "test.cb",
            "func main(args) { foreach(a : args) { print(a); } }",
            vec!["one".to_string(), "two".to_string()],
        )
        .unwrap();
    assert_eq!(console.output_text(), "one\ntwo\n");
}
