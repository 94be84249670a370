//! Conformance: the AST interpreter is the oracle for the bytecode VM.
//! Every program in the corpus must produce identical output through both
//! engines, and fatal programs must fail in the same category.

use feeny::{CollectStringPrint, FeenyError, Runner, RuntimeError};
use pretty_assertions::assert_eq;

fn outputs(source: &str) -> (String, String) {
    let runner = Runner::new(source).expect("parse failed");

    let mut ast_out = CollectStringPrint::new();
    runner.run_ast(&mut ast_out).expect("ast run failed");

    let mut vm_out = CollectStringPrint::new();
    runner.run_vm(&mut vm_out).expect("vm run failed");

    (ast_out.into_output(), vm_out.into_output())
}

fn assert_conformant(source: &str) {
    let (ast, vm) = outputs(source);
    assert_eq!(ast, vm, "engines disagree on:\n{source}");
}

fn errors(source: &str) -> (RuntimeError, RuntimeError) {
    let runner = Runner::new(source).expect("parse failed");

    let mut sink = CollectStringPrint::new();
    let ast_err = match runner.run_ast(&mut sink).expect_err("ast run should fail") {
        FeenyError::Runtime(e) => e,
        other => panic!("unexpected ast error: {other}"),
    };
    let vm_err = match runner.run_vm(&mut sink).expect_err("vm run should fail") {
        FeenyError::Runtime(e) => e,
        other => panic!("unexpected vm error: {other}"),
    };
    (ast_err, vm_err)
}

const CORPUS: &[&str] = &[
    // Literals and arithmetic
    "printf(\"~\\n\", 0)\n",
    "printf(\"~\\n\", 1 + 2 * 3 - 4)\n",
    "printf(\"~\\n\", (1 + 2) * (3 - 4))\n",
    "printf(\"~\\n\", 100 / 7)\n",
    "printf(\"~\\n\", 100 % 7)\n",
    "printf(\"~\\n\", -17)\n",
    "printf(\"~\\n\", - - 5)\n",
    // Comparison results: int 0 is truthy, null is the only false
    "printf(\"~\\n\", 1 < 2)\n",
    "if 3 > 2:\n    printf(\"gt\\n\")\n",
    "if 2 == 2:\n    printf(\"eq\\n\")\nelse:\n    printf(\"ne\\n\")\n",
    "if 0:\n    printf(\"zero-true\\n\")\n",
    "if null:\n    printf(\"a\\n\")\nelse:\n    printf(\"b\\n\")\n",
    "if 2 >= 3:\n    printf(\"a\\n\")\nelse:\n    printf(\"b\\n\")\n",
    "if 2 <= 2:\n    printf(\"a\\n\")\nelse:\n    printf(\"b\\n\")\n",
    // Globals and assignment as an expression
    "var x = 1\nx = x + 1\nprintf(\"~\\n\", x)\n",
    "var x = 0\nvar y = 0\nx = y = 7\nprintf(\"~ ~\\n\", x, y)\n",
    // While loops
    "var i = 0\nvar sum = 0\nwhile i < 10:\n    sum = sum + i\n    i = i + 1\nprintf(\"~\\n\", sum)\n",
    "var i = 5\nwhile i > 0:\n    printf(\"~ \", i)\n    i = i - 1\nprintf(\"\\n\")\n",
    // Functions
    "defn add3(a, b, c):\n    a + b + c\nprintf(\"~\\n\", add3(1, 2, 3))\n",
    "defn fib(n):\n    if n < 2:\n        n\n    else:\n        fib(n-1) + fib(n-2)\nprintf(\"~\\n\", fib(12))\n",
    "defn even(n):\n    if n == 0:\n        1\n    else:\n        odd(n - 1)\ndefn odd(n):\n    if n == 0:\n        0\n    else:\n        even(n - 1)\nprintf(\"~ ~\\n\", even(10), odd(10))\n",
    // Locals shadowing globals
    "var x = 1\ndefn f():\n    var x = 2\n    x\nprintf(\"~ ~\\n\", f(), x)\n",
    // Arrays
    "var a = array(4, 9)\nprintf(\"~ ~\\n\", a[3], a.length())\n",
    "var a = array(3, 0)\nvar i = 0\nwhile i < 3:\n    a[i] = i * i\n    i = i + 1\nprintf(\"~ ~ ~\\n\", a[0], a[1], a[2])\n",
    "var a = array(2, 0)\nvar b = a\nb[1] = 5\nprintf(\"~\\n\", a[1])\n",
    "var a = array(2, array(2, 1))\nprintf(\"~\\n\", a[0][1])\n",
    // Objects, slots, methods
    "var o = object:\n    var x = 42\nprintf(\"~\\n\", o.x)\n",
    "var o = object:\n    var x = 1\no.x = 9\nprintf(\"~\\n\", o.x)\n",
    "var o = object:\n    var n = 0\n    method bump():\n        this.n = this.n + 1\no.bump()\no.bump()\no.bump()\nprintf(\"~\\n\", o.n)\n",
    "var o = object:\n    var v = 7\n    method scaled(k):\n        this.v * k\nprintf(\"~\\n\", o.scaled(6))\n",
    // Implicit this
    "var o = object:\n    var v = 1\n    method touch(d):\n        v = v + d\n        v\nprintf(\"~\\n\", o.touch(4))\n",
    // Prototype chains
    "var p = object:\n    var x = 1\n    method get_x():\n        this.x\nvar c = object p:\n    var y = 2\n    method sum():\n        this.get_x() + this.y\nprintf(\"~\\n\", c.sum())\n",
    "var p = object:\n    var x = 1\nvar c = object p:\n    var y = 2\nc.x = 5\nprintf(\"~ ~\\n\", p.x, c.x)\n",
    "var base = object:\n    method describe():\n        0\nvar mid = object base:\n    var z = 1\nvar leaf = object mid:\n    var w = 2\nprintf(\"~\\n\", leaf.describe())\n",
    // Method overriding
    "var p = object:\n    method f():\n        1\nvar c = object p:\n    method f():\n        2\nprintf(\"~ ~\\n\", p.f(), c.f())\n",
    // Objects in data structures, functions returning objects
    "defn point(x, y):\n    object:\n        var px = x\n        var py = y\n        method dot(ox, oy):\n            this.px * ox + this.py * oy\nvar p = point(3, 4)\nprintf(\"~\\n\", p.dot(5, 6))\n",
    // Nested control flow
    "var i = 0\nvar total = 0\nwhile i < 4:\n    var j = 0\n    while j < 4:\n        if i < j:\n            total = total + 1\n        j = j + 1\n    i = i + 1\nprintf(\"~\\n\", total)\n",
    // if/while as expressions
    "var x = if 1 < 2:\n    10\nelse:\n    20\nprintf(\"~\\n\", x)\n",
    "var w = while null:\n    1\nif w:\n    printf(\"t\\n\")\nelse:\n    printf(\"f\\n\")\n",
    // printf with no newline and several chunks
    "printf(\"a\")\nprintf(\"b~c\", 1)\nprintf(\"\\n\")\n",
];

#[test]
fn test_corpus_conformance() {
    for source in CORPUS {
        assert_conformant(source);
    }
}

#[test]
fn test_error_conformance_divide_by_zero() {
    let (ast, vm) = errors("printf(\"~\\n\", 1 / 0)\n");
    assert_eq!(ast, RuntimeError::DivideByZero);
    assert_eq!(vm, RuntimeError::DivideByZero);
}

#[test]
fn test_error_conformance_undefined_method() {
    let (ast, vm) = errors("var o = object:\n    var x = 1\no.nope()\n");
    assert_eq!(ast, RuntimeError::UndefinedMethod("nope".to_owned()));
    assert_eq!(vm, RuntimeError::UndefinedMethod("nope".to_owned()));
}

#[test]
fn test_error_conformance_array_bounds() {
    let (ast, vm) = errors("var a = array(2, 0)\na[2]\n");
    assert_eq!(ast, RuntimeError::IndexOutOfBounds { index: 2, length: 2 });
    assert_eq!(vm, ast);
}

#[test]
fn test_error_conformance_call_on_null() {
    let (ast, vm) = errors("null.add(1)\n");
    assert!(matches!(ast, RuntimeError::TypeError(_)));
    assert!(matches!(vm, RuntimeError::TypeError(_)));
}

#[test]
fn test_error_conformance_wrong_arity() {
    let (ast, vm) = errors("defn f(a):\n    a\nf(1, 2)\n");
    assert!(matches!(ast, RuntimeError::WrongArity { .. }));
    assert!(matches!(vm, RuntimeError::WrongArity { .. }));
}

#[test]
fn test_error_conformance_undefined_function() {
    let runner = Runner::new("nope(1)\n").expect("parse failed");
    let mut sink = CollectStringPrint::new();
    let ast_err = runner.run_ast(&mut sink).expect_err("ast run should fail");
    let vm_err = runner.run_vm(&mut sink).expect_err("vm run should fail");
    assert!(matches!(
        ast_err,
        FeenyError::Runtime(RuntimeError::UndefinedFunction(ref n)) if n == "nope"
    ));
    assert!(matches!(
        vm_err,
        FeenyError::Runtime(RuntimeError::UndefinedFunction(ref n)) if n == "nope"
    ));
}
