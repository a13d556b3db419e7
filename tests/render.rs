// End-to-end rendering of single templates compiled from strings.

use pugmill::{compile_string, Function, RenderError, Value};
use serde_json::json;

fn run(source: &str, data: serde_json::Value) -> String {
    let tpl = compile_string(source).unwrap();
    tpl.render(&Value::from(data)).unwrap().trim().to_string()
}

fn key(value: &str) -> serde_json::Value {
    json!({ "Key": value })
}

// ── Tags ──

#[test]
fn doctype_html() {
    assert_eq!(run("doctype html", json!(null)), "<!DOCTYPE html>");
}

#[test]
fn nesting_with_deep_tab_indentation() {
    let source = "html\n\t\t\t\t\t\thead\n\t\t\t\t\t\t\ttitle\n\t\t\t\t\t\tbody";
    assert_eq!(
        run(source, json!(null)),
        "<html><head><title></title></head><body></body></html>"
    );
}

#[test]
fn id_shorthand() {
    assert_eq!(run("div#test", json!(null)), r#"<div id="test"></div>"#);
}

#[test]
fn class_shorthand() {
    assert_eq!(run("div.test", json!(null)), r#"<div class="test"></div>"#);
}

#[test]
fn implicit_div_nesting_with_alignment_space() {
    let source = "\n.cl1\n\t\t.cl2\n\t\t\t .cl3 test\n\t\t";
    assert_eq!(
        run(source, json!(null)),
        r#"<div class="cl1"><div class="cl2"><div class="cl3">test</div></div></div>"#
    );
}

#[test]
fn self_closing_tag() {
    assert_eq!(
        run(r#"div(name="foo")/"#, json!(null)),
        r#"<div name="foo" />"#
    );
}

#[test]
fn empty_template() {
    assert_eq!(run("", json!(null)), "");
}

#[test]
fn tag_interpolation() {
    assert_eq!(
        run("p Hello #[foo] World", json!(null)),
        "<p>Hello <foo></foo> World</p>"
    );
    assert_eq!(
        run("p Hello #[foo(bar='123')] World", json!(null)),
        r#"<p>Hello <foo bar="123"></foo> World</p>"#
    );
    assert_eq!(
        run("p Hello #[foo(bar='123') baz] World", json!(null)),
        r#"<p>Hello <foo bar="123">baz</foo> World</p>"#
    );
}

#[test]
fn raw_text_block_keeps_its_lines() {
    assert_eq!(
        run("\nstyle.\n  body{ color: red }\np a\n", json!(null)),
        "<style>  body{ color: red }\n</style><p>a</p>"
    );
}

// ── Attributes ──

#[test]
fn single_quoted_attribute() {
    assert_eq!(
        run("div(x-arg='test')", json!(null)),
        r#"<div x-arg="test"></div>"#
    );
}

#[test]
fn attribute_with_escaped_quotes_and_concatenation() {
    assert_eq!(
        run(r#"div(x-arg='test=\''+'\';')"#, json!(null)),
        r#"<div x-arg="test='';"></div>"#
    );
}

#[test]
fn classes_merge_from_shorthand_and_attributes() {
    let source = "\ndiv.test.foo.bar(class=\"baz\")\n\tp.foo(class=[\"bar\", \"baz\"]): a(href=\"#\") foo\n\t\t| bar\n";
    assert_eq!(
        run(source, json!(null)),
        r##"<div class="test foo bar baz"><p class="foo bar baz"><a href="#">foobar</a></p></div>"##
    );
}

#[test]
fn object_class_keeps_truthy_keys() {
    let source = "\ndiv.test.foo(class={bar: true, \"baz\": 5<4, buzz: 4<5})\n";
    assert_eq!(
        run(source, json!(null)),
        r#"<div class="test foo bar buzz"></div>"#
    );
}

#[test]
fn attribute_forms_and_order() {
    let source = "\ndiv(name=\"Test\" @foo.bar=\"baz\", commasep=1 unescaped!=\"<foo>\").testclass\n\tp(style=\"text-align: center; color: maroon\" \"quoted\"= \"foo\")\n\t\tspan.class-name#id-name\n";
    assert_eq!(
        run(source, json!(null)),
        concat!(
            r#"<div name="Test" @foo.bar="baz" commasep="1" unescaped="<foo>" class="testclass">"#,
            r#"<p style="text-align: center; color: maroon" quoted="foo">"#,
            r#"<span class="class-name" id="id-name"></span></p></div>"#
        )
    );
}

#[test]
fn bare_attribute() {
    assert_eq!(run("div(name)", json!(null)), "<div name></div>");
}

#[test]
fn map_attribute_renders_as_json() {
    assert_eq!(
        run(r#"div(attr={foo: "bar"})"#, json!(null)),
        r#"<div attr="{&#34;foo&#34;:&#34;bar&#34;}"></div>"#
    );
}

#[test]
fn attribute_from_assigned_variable() {
    let source = "\n- var Color2 = Color\ndiv(style='background: '+Color2)\n";
    assert_eq!(
        run(source, json!({ "Color": "rgb(0, 0, 0)" })),
        r#"<div style="background: rgb(0, 0, 0)"></div>"#
    );
}

#[test]
fn style_map_renders_declarations() {
    assert_eq!(
        run(
            r#"p(style="color: red"): span(style={color: "green", "font-size": 20})"#,
            json!(null)
        ),
        r#"<p style="color: red"><span style="color:green;font-size:20"></span></p>"#
    );
}

#[test]
fn nil_class_renders_empty() {
    assert_eq!(run("p(class=nil)", json!(null)), r#"<p class=""></p>"#);
}

#[test]
fn dollar_sign_in_attribute() {
    assert_eq!(
        run(r#"input(placeholder="$ per "+kwh)"#, json!({ "kwh": "kWh" })),
        r#"<input placeholder="$ per kWh" />"#
    );
}

#[test]
fn boolean_attributes() {
    assert_eq!(
        run("input(checked=on disabled=off)", json!({ "on": true, "off": false })),
        "<input checked />"
    );
}

// ── Expressions ──

#[test]
fn arithmetic_precedence() {
    let data = json!({ "A": 2, "B": 3, "C": 4 });
    assert_eq!(run("| #{A + B * C}", data), "14");
}

#[test]
fn comparison_of_arithmetic() {
    let data = json!({ "A": 2, "B": 3, "C": 4 });
    assert_eq!(run("| #{C - A < B}", data), "true");
}

#[test]
fn escaped_and_raw_interpolation() {
    assert_eq!(
        run("| #{Key} !{Key}", key("<hr />")),
        "&lt;hr /&gt; <hr />"
    );
}

#[test]
fn buffered_code_lines() {
    assert_eq!(
        run("\np\n = Key\n != Key\n", key("<hr />")),
        "<p>&lt;hr /&gt;<hr /></p>"
    );
}

#[test]
fn nested_ternary() {
    let data = json!({ "A": 2, "B": 3 });
    assert_eq!(run(r#"| #{ B > A ? A > B ? "x" : "y" : "z" }"#, data), "y");
}

#[test]
fn array_literal_display() {
    assert_eq!(run("| #{ [1,2,3] }", json!(null)), "[1 2 3]");
}

#[test]
fn index_access() {
    assert_eq!(
        run("p.index= Items[1]", json!({ "Items": ["test1", "test2"] })),
        r#"<p class="index">test2</p>"#
    );
}

#[test]
fn map_access_through_function_call() {
    let inner: Value = [("c", "d")].into_iter().collect();
    let b = Function::new("b", move |_| Ok(inner.clone()));
    let a: Value = [("b", b)].into_iter().collect();
    let data: Value = [("a", a)].into_iter().collect();
    let tpl = compile_string("p #{a.b().c}").unwrap();
    assert_eq!(tpl.render(&data).unwrap(), "<p>d</p>");
}

#[test]
fn logical_and_in_condition_and_output() {
    let source = "\nif true && true\n\tp #{true && true}\n\t\t";
    assert_eq!(run(source, json!(null)), "<p>true</p>");
}

#[test]
fn undefined_identifier_is_an_error() {
    let tpl = compile_string("p= missing.field").unwrap();
    let err = tpl.render(&Value::Null).unwrap_err();
    assert!(matches!(
        err.as_render(),
        Some(RenderError::UndefinedIdentifier { name }) if name == "missing"
    ));
}

#[test]
fn render_errors_carry_position() {
    let tpl = compile_string("div\n  p= 1 / 0").unwrap();
    let err = tpl.render(&Value::Null).unwrap_err();
    assert_eq!(err.to_string(), "<string>:2:6: division by zero");
}

#[test]
fn attribute_errors_point_at_the_attribute() {
    let tpl = compile_string("div\n  p(a=1 title=1 / 0)").unwrap();
    let err = tpl.render(&Value::Null).unwrap_err();
    assert_eq!(err.to_string(), "<string>:2:9: division by zero");

    let tpl = compile_string("p.x(id=\"i\" class=n.y)").unwrap();
    let data: Value = [("n", 1)].into_iter().collect();
    let err = tpl.render(&data).unwrap_err();
    assert!(err.to_string().starts_with("<string>:1:12: "), "{err}");
}

// ── Control flow ──

#[test]
fn if_else_with_mixed_indent_widths() {
    let source = "\nif Key == \"foo\"\n\t| foo\nelse\n | bar\n";
    assert_eq!(run(source, key("foo")), "foo");
    assert_eq!(run(source, key("baz")), "bar");
}

#[test]
fn else_if_chain() {
    let source = "if n == 1\n  | one\nelse if n == 2\n  | two\nelse\n  | many";
    assert_eq!(run(source, json!({ "n": 2 })), "two");
    assert_eq!(run(source, json!({ "n": 7 })), "many");
}

#[test]
fn unless() {
    let source = "\nunless Key != \"bar\"\n\t| foo\n";
    assert_eq!(run(source, key("foo")), "");
    assert_eq!(run(source, key("bar")), "foo");
}

#[test]
fn each_with_index_and_ternary_class() {
    let source = "\neach item, i in Items\n\tp(class=i % 2 == 0 ? \"even\" : \"odd\") #{item}";
    assert_eq!(
        run(source, json!({ "Items": ["test1", "test2"] })),
        r#"<p class="even">test1</p><p class="odd">test2</p>"#
    );
}

#[test]
fn each_over_list() {
    let source = "\neach v in Items\n\t\tp #{v}\n\t\t";
    assert_eq!(
        run(source, json!({ "Items": ["t1", "t2"] })),
        "<p>t1</p><p>t2</p>"
    );
}

#[test]
fn each_inside_each() {
    let source = "\neach v1 in Arr1\n\teach v2 in Arr2\n\t\tp #{v1}#{v2}\n\t\t";
    assert_eq!(
        run(source, json!({ "Arr1": [1, 2], "Arr2": [3, 4] })),
        "<p>13</p><p>14</p><p>23</p><p>24</p>"
    );
}

#[test]
fn each_over_map_yields_values_and_keys() {
    let source = "each v, k in m\n  | #{k}=#{v};";
    assert_eq!(run(source, json!({ "m": { "b": 2, "a": 1 } })), "a=1;b=2;");
}

#[test]
fn each_over_scalar_is_an_error() {
    let tpl = compile_string("each v in n\n  p= v").unwrap();
    let data: Value = [("n", 3)].into_iter().collect();
    let err = tpl.render(&data).unwrap_err();
    assert!(matches!(err.as_render(), Some(RenderError::NotIterable { .. })));
}

#[test]
fn assignment_overwrites() {
    let source = "\n- var vrb = \"test\"\n- var vrb = \"test2\"\np #{vrb}\n";
    assert_eq!(run(source, json!(null)), "<p>test2</p>");
}

#[test]
fn assignment_inside_if_is_visible_after_it() {
    let source = "\n- var vRb = \"test\"\np #{vRb}\nif 1==1\n\t- var vRb = \"test2\"\np #{vRb}\n";
    assert_eq!(run(source, json!(null)), "<p>test</p><p>test2</p>");
}

#[test]
fn standalone_block_renders_its_children() {
    let source = "\nblock deneme\n\t\tp Test\n\t\t";
    assert_eq!(run(source, json!(null)), "<p>Test</p>");
}

// ── Mixins ──

#[test]
fn mixin_without_arguments() {
    let source = "\nmixin test()\n\tp #{Key}\n\n+test()\n";
    assert_eq!(run(source, key("value")), "<p>value</p>");
}

#[test]
fn mixin_with_arguments() {
    let source = "\nmixin test(arg, arg2)\n\tp #{Key} #{arg} #{arg2}\n\n+test(15, 1+1)\n";
    assert_eq!(run(source, key("value")), "<p>value 15 2</p>");
}

#[test]
fn missing_mixin_arguments_are_nil() {
    let source = "mixin pair(a, b)\n  p #{a}-#{b}\n+pair(1)";
    assert_eq!(run(source, json!(null)), "<p>1-</p>");
}

#[test]
fn mixin_calls_do_not_share_arguments() {
    let source = "mixin m(a, b)\n  p #{a}-#{b}\n+m(1, 2)\n+m(3)";
    assert_eq!(run(source, json!(null)), "<p>1-2</p><p>3-</p>");
}

#[test]
fn unknown_mixin_is_an_error() {
    let tpl = compile_string("+nope()").unwrap();
    let err = tpl.render(&Value::Null).unwrap_err();
    assert!(matches!(
        err.as_render(),
        Some(RenderError::UnknownMixin { name }) if name == "nope"
    ));
}

#[test]
fn runaway_recursion_is_stopped() {
    let tpl = compile_string("mixin loop()\n  +loop()\n+loop()").unwrap();
    let err = tpl.render(&Value::Null).unwrap_err();
    assert!(matches!(err.as_render(), Some(RenderError::RecursionLimit { .. })));
}
