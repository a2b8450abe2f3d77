use bytescript::value::Value;
use bytescript::{load, CollectingSink, VmConfig};

#[test]
fn test_recursive_fib() {
    let source = r#"
        int fib(int n) {
            if (n < 2) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
    "#;
    let (vm, results) = load(source, VmConfig::default()).expect("Load failed");
    assert!(results.iter().all(|r| r.success()));

    let mut sink = CollectingSink::default();
    let result = vm.execute("fib", &[Value::Int(10)], &mut sink);
    assert!(result.success);
    assert_eq!(result.script, "fib");
    assert_eq!(result.return_value, Some(Value::Int(55)));
}

#[test]
fn test_nested_print_is_observed_once() {
    let source = r#"
        void greet(string who) {
            print("hello " + who);
        }

        int main() {
            greet("world");
            return 0;
        }
    "#;
    let (vm, _) = load(source, VmConfig::default()).expect("Load failed");
    let mut sink = CollectingSink::default();
    let result = vm.execute("main", &[], &mut sink);
    assert!(result.success);
    assert_eq!(sink.prints, vec!["hello world"]);
    assert!(sink.errors.is_empty());
}

#[test]
fn test_print_three_calls_deep_in_fib() {
    let source = r#"
        int fib(int n, int depth) {
            if (depth == 3 && n == 7) {
                print("fib " + n + " at depth " + depth);
            }
            if (n < 2) { return n; }
            return fib(n - 1, depth + 1) + fib(n - 2, depth + 1);
        }
    "#;
    let (vm, results) = load(source, VmConfig::default()).expect("Load failed");
    assert!(results.iter().all(|r| r.success()));

    let mut sink = CollectingSink::default();
    let result = vm.execute("fib", &[Value::Int(10), Value::Int(0)], &mut sink);
    assert_eq!(result.return_value, Some(Value::Int(55)));
    assert_eq!(sink.prints, vec!["fib 7 at depth 3"]);
    assert!(sink.errors.is_empty());
}

#[test]
fn test_long_expression_is_a_syntax_error() {
    let terms = vec!["1"; 1500].join(" + ");
    let source = format!("int long() {{ return {}; }}\nint short() {{ return 2; }}", terms);
    let (vm, results) = load(&source, VmConfig::default()).expect("Load failed");

    assert!(results[0].syntax_error);
    assert!(results[0].errors[0].contains("nesting exceeds"));
    assert!(results[1].success());
    assert!(!vm.registry().contains("long"));

    let terms = vec!["1"; 200].join(" + ");
    let source = format!("int sum() {{ return {}; }}", terms);
    let (vm, _) = load(&source, VmConfig::default()).expect("Load failed");
    let result = vm.execute("sum", &[], &mut CollectingSink::default());
    assert_eq!(result.return_value, Some(Value::Int(200)));
}

#[test]
fn test_int_min_literal() {
    let source = r#"
        int lowest() { return -2147483648; }
        int wraps() { return lowest() - 1; }
    "#;
    let (vm, results) = load(source, VmConfig::default()).expect("Load failed");
    assert!(results.iter().all(|r| r.success()));

    let mut sink = CollectingSink::default();
    let result = vm.execute("lowest", &[], &mut sink);
    assert_eq!(result.return_value, Some(Value::Int(i32::MIN)));
    let result = vm.execute("wraps", &[], &mut sink);
    assert_eq!(result.return_value, Some(Value::Int(i32::MAX)));
}

#[test]
fn test_divide_by_unassigned_variable() {
    let source = r#"
        float ratio(float top) {
            float bottom;
            return top / bottom;
        }
    "#;
    let (vm, _) = load(source, VmConfig::default()).expect("Load failed");
    let mut sink = CollectingSink::default();
    let result = vm.execute("ratio", &[Value::Float(1.0)], &mut sink);
    assert!(!result.success);
    assert_eq!(result.return_value, None);
    assert_eq!(sink.errors.len(), 1);
}

#[test]
fn test_channels_and_mixed_arithmetic() {
    let source = r#"
        @ai float lerp(float a, float b, float t) {
            return a + (b - a) * t;
        }

        @ai float halfway(int from, int to) {
            return lerp(from, to, 0.5);
        }
    "#;
    let (vm, results) = load(source, VmConfig::default()).expect("Load failed");
    assert!(results.iter().all(|r| r.success()));

    let unit = vm.registry().get("halfway").expect("halfway compiled");
    assert_eq!(unit.header().channel(), "ai");

    let mut sink = CollectingSink::default();
    let result = vm.execute("halfway", &[Value::Int(2), Value::Int(6)], &mut sink);
    assert_eq!(result.return_value, Some(Value::Float(4.0)));
}

#[test]
fn test_loops_and_scopes() {
    let source = r#"
        string stars(int n) {
            string out = "";
            int i = 0;
            while (i < n) {
                int next = i + 1;
                if (next % 2 == 0) { out = out + "+"; } else { out = out + "*"; }
                i = next;
            }
            return out;
        }
    "#;
    let (vm, _) = load(source, VmConfig::default()).expect("Load failed");
    let mut sink = CollectingSink::default();
    let result = vm.execute("stars", &[Value::Int(5)], &mut sink);
    assert_eq!(result.return_value, Some(Value::Str("*+*+*".to_string())));
}

#[test]
fn test_configured_call_depth() {
    let source = r#"
        int depth(int n) {
            if (n == 0) { return 0; }
            return depth(n - 1) + 1;
        }
    "#;
    let (vm, _) = load(source, VmConfig { max_call_depth: 8 }).expect("Load failed");
    let mut sink = CollectingSink::default();

    let result = vm.execute("depth", &[Value::Int(7)], &mut sink);
    assert_eq!(result.return_value, Some(Value::Int(7)));

    let result = vm.execute("depth", &[Value::Int(8)], &mut sink);
    assert!(!result.success);
    assert!(sink.errors[0].contains("stack overflow"));
}

#[test]
fn test_deep_recursion_uses_no_host_stack() {
    let source = r#"
        int count(int n) {
            if (n == 0) { return 0; }
            return 1 + count(n - 1);
        }
    "#;
    let (vm, _) = load(source, VmConfig { max_call_depth: 100_000 }).expect("Load failed");
    let mut sink = CollectingSink::default();
    let result = vm.execute("count", &[Value::Int(50_000)], &mut sink);
    assert_eq!(result.return_value, Some(Value::Int(50_000)));
}
