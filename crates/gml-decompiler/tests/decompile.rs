//! Assembly listings decompiled all the way to GML text.

use gmvm::asm::assemble;
use gml_decompiler::{
    DecompileContext, DecompileSettings, DecompileWarning, DecompilerPhase, GlobalFunctions, MacroRegistry,
    SimpleGameContext,
};

const CODE_ENTRY: &str = "gml_Object_obj_player_Step_0";

fn decompile_with(source: &str, game: &SimpleGameContext, settings: &DecompileSettings) -> String {
    let code = assemble(CODE_ENTRY, source).expect("listing should assemble");
    DecompileContext::new(game, &code, settings)
        .decompile_to_string()
        .expect("listing should decompile")
}

fn decompile(source: &str) -> String {
    decompile_with(source, &SimpleGameContext::default(), &DecompileSettings::default())
}

#[test]
fn add_one_is_an_increment() {
    let text = decompile(
        "push.v self.a
push.e 1
add.i.v
pop.v.v self.a
exit.i
",
    );
    assert_eq!(text, "a++;\n");
}

#[test]
fn add_of_immediate_is_compound() {
    let text = decompile(
        "push.v self.a
pushi.e 5
add.i.v
pop.v.v self.a
exit.i
",
    );
    assert_eq!(text, "a += 5;\n");
}

#[test]
fn skipping_cleanup_keeps_trailing_exit() {
    let settings = DecompileSettings::from_skip_list(&["clean-ast"]);
    let text = decompile_with(
        "push.v self.a
push.e 1
add.i.v
pop.v.v self.a
exit.i
",
        &SimpleGameContext::default(),
        &settings,
    );
    assert_eq!(text, "a++;\nexit;\n");
}

#[test]
fn leftover_stack_is_an_error_unless_allowed() {
    let code = assemble(CODE_ENTRY, "pushi.e 1\nexit.i\n").unwrap();
    let game = SimpleGameContext::default();

    let strict = DecompileSettings::default();
    let err = DecompileContext::new(&game, &code, &strict)
        .decompile_to_string()
        .unwrap_err();
    assert_eq!(err.phase, DecompilerPhase::AstBuilding);
    assert_eq!(err.code_entry, CODE_ENTRY);

    let lenient = DecompileSettings {
        allow_leftover_data_on_stack: true,
        ..DecompileSettings::default()
    };
    let mut ctx = DecompileContext::new(&game, &code, &lenient);
    assert_eq!(ctx.decompile_to_string().unwrap(), "");
    assert_eq!(
        ctx.warnings(),
        &[DecompileWarning::DataLeftOnStack {
            count: 1,
            code_entry: CODE_ENTRY.to_string(),
        }]
    );
}

#[test]
fn counting_loop_becomes_for() {
    let text = decompile(
        "pushi.e 0
pop.v.i local.i
:[head]
push.v local.i
pushi.e 10
cmp.i.v LT
bf [end]
call.i foo 0
popz.v
push.v local.i
push.e 1
add.i.v
pop.v.v local.i
b [head]
:[end]
exit.i
",
    );
    assert_eq!(text, "for (var i = 0; i < 10; i++)\n{\n    foo();\n}\n");
}

#[test]
fn if_else_with_ternary() {
    let text = decompile(
        "push.v self.a
conv.v.b
bf [else]
push.v self.b
conv.v.b
bf [two]
pushi.e 1
b [store]
:[two]
pushi.e 2
:[store]
pop.v.i self.x
b [end]
:[else]
pushi.e 3
pop.v.i self.y
:[end]
exit.i
",
    );
    assert_eq!(text, "if (a)\n{\n    x = b ? 1 : 2;\n}\nelse\n{\n    y = 3;\n}\n");
}

#[test]
fn repeat_and_with_other() {
    let text = decompile(
        "pushi.e 3
dup.i 0
push.e 0
cmp.i.e LTE
bt [after]
:[head]
call.i foo 0
popz.v
push.e 1
sub.i.i
dup.i 0
conv.i.b
bt [head]
:[after]
popz.i
pushi.e -2
pushenv [tail]
:[body]
call.i bar 0
popz.v
:[tail]
popenv [body]
exit.i
",
    );
    assert_eq!(text, "repeat (3)\n{\n    foo();\n}\nwith (other)\n{\n    bar();\n}\n");
}

#[test]
fn try_catch_prints_the_exception_name() {
    let text = decompile(
        "push.i 96
conv.i.v
push.i 64
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[catch]
pop.v.v local.err
call.i @@try_unhook@@ 0
popz.v
call.i recover 0
popz.v
:[fin]
exit.i
",
    );
    assert_eq!(text, "try\n{\n    risky();\n}\ncatch (err)\n{\n    recover();\n}\n");
}

#[test]
fn continue_and_break_in_repeat() {
    let text = decompile(
        "pushi.e 3
dup.i 0
push.e 0
cmp.i.e LTE
bt [after]
:[head]
push.v self.a
conv.v.b
bf [skip1]
b [tail]
:[skip1]
push.v self.b
conv.v.b
bf [skip2]
b [after]
:[skip2]
call.i f 0
popz.v
:[tail]
push.e 1
sub.i.i
dup.i 0
conv.i.b
bt [head]
:[after]
popz.i
exit.i
",
    );
    assert_eq!(
        text,
        "repeat (3)\n{\n    if (a)\n    {\n        continue;\n    }\n    if (b)\n    {\n        break;\n    }\n    f();\n}\n"
    );
}

#[test]
fn nested_continue_in_do_until() {
    let text = decompile(
        ":[head]
push.v self.a
conv.v.b
bf [skip_a]
push.v self.b
conv.v.b
bf [skip_b]
b [tail]
:[skip_b]
call.i g 0
popz.v
:[skip_a]
call.i h 0
popz.v
:[tail]
push.v self.c
conv.v.b
bf [head]
exit.i
",
    );
    assert_eq!(
        text,
        "do\n{\n    if (a)\n    {\n        if (b)\n        {\n            continue;\n        }\n        g();\n    }\n    h();\n} until (c);\n"
    );
}

#[test]
fn break_in_do_until() {
    let text = decompile(
        ":[head]
push.v self.a
conv.v.b
bf [skip]
b [after]
:[skip]
call.i f 0
popz.v
push.v self.c
conv.v.b
bf [head]
:[after]
exit.i
",
    );
    assert_eq!(
        text,
        "do\n{\n    if (a)\n    {\n        break;\n    }\n    f();\n} until (c);\n"
    );
}

#[test]
fn if_else_at_end_of_do_until_body() {
    let text = decompile(
        ":[head]
push.v self.a
conv.v.b
bf [else]
call.i x 0
popz.v
b [tail]
:[else]
call.i y 0
popz.v
:[tail]
push.v self.c
conv.v.b
bf [head]
exit.i
",
    );
    assert_eq!(
        text,
        "do\n{\n    if (a)\n    {\n        x();\n    }\n    else\n    {\n        y();\n    }\n} until (c);\n"
    );
}

#[test]
fn continue_and_break_in_with() {
    let text = decompile(
        "pushi.e -2
pushenv [tail]
:[body]
push.v self.a
conv.v.b
bf [skip1]
b [tail]
:[skip1]
push.v self.b
conv.v.b
bf [skip2]
b [brk]
:[skip2]
call.i foo 0
popz.v
:[tail]
popenv [body]
b [after]
:[brk]
popenv <drop>
:[after]
exit.i
",
    );
    assert_eq!(
        text,
        "with (other)\n{\n    if (a)\n    {\n        continue;\n    }\n    if (b)\n    {\n        break;\n    }\n    foo();\n}\n"
    );
}

#[test]
fn try_finally_runs_cleanup() {
    let text = decompile(
        "push.i 64
conv.i.v
push.i -1
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[fin]
call.i cleanup 0
popz.v
call.i @@finish_finally@@ 0
popz.v
call.i after 0
popz.v
exit.i
",
    );
    assert_eq!(
        text,
        "try\n{\n    risky();\n}\nfinally\n{\n    cleanup();\n}\nafter();\n"
    );
}

const TRY_CATCH_FINALLY: &str = "try\n{\n    risky();\n}\ncatch (err)\n{\n    recover();\n}\nfinally\n{\n    cleanup();\n}\n";

#[test]
fn try_catch_finally() {
    let text = decompile(
        "push.i 100
conv.i.v
push.i 64
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[catch]
pop.v.v local.err
call.i @@try_unhook@@ 0
popz.v
call.i recover 0
popz.v
b [fin]
:[fin]
call.i cleanup 0
popz.v
call.i @@finish_finally@@ 0
popz.v
exit.i
",
    );
    assert_eq!(text, TRY_CATCH_FINALLY);
}

#[test]
fn older_games_lay_out_finally_before_catch() {
    let game = SimpleGameContext {
        older_exception_handling: true,
        ..SimpleGameContext::default()
    };
    let text = decompile_with(
        "push.i 64
conv.i.v
push.i 92
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[fin]
call.i cleanup 0
popz.v
call.i @@finish_finally@@ 0
popz.v
b [after]
:[catch]
pop.v.v local.err
call.i @@try_unhook@@ 0
popz.v
call.i recover 0
popz.v
b [fin]
:[after]
exit.i
",
        &game,
        &DecompileSettings::default(),
    );
    assert_eq!(text, TRY_CATCH_FINALLY);
}

#[test]
fn short_circuit_and_nullish() {
    let text = decompile(
        "push.v self.a
conv.v.b
bf [false]
push.v self.b
conv.v.b
bf [false]
push.v self.c
conv.v.b
b [done]
:[false]
push.e 0
:[done]
pop.v.b self.x
push.v self.a
isnullish.e
bf [end]
popz.v
push.v self.b
:[end]
pop.v.v self.c
exit.i
",
    );
    assert_eq!(text, "x = a && b && c;\nc = a ?? b;\n");
}

const STATE_REGISTRY: &str = r#"{
    "Types": {
        "Enums": { "State": { "Values": { "0": "Idle", "1": "Walk", "2": "Jump" } } }
    },
    "GlobalNames": { "Variables": { "state": "State" } }
}"#;

#[test]
fn switch_cases_resolve_to_enum_values() {
    let registry = MacroRegistry::from_json(STATE_REGISTRY).unwrap();
    let game = SimpleGameContext::with_registry(registry);
    let source = "push.v self.state
dup.v 0
pushi.e 0
cmp.i.v EQ
bt [idle]
dup.v 0
pushi.e 1
cmp.i.v EQ
bt [walk]
b [end]
:[idle]
call.i stop 0
popz.v
b [end]
:[walk]
call.i move 0
popz.v
:[end]
popz.v
exit.i
";
    let text = decompile_with(source, &game, &DecompileSettings::default());
    assert_eq!(
        text,
        "enum State\n{\n    Idle = 0,\n    Walk = 1\n}\n\n\
         switch (state)\n{\n    case State.Idle:\n        stop();\n        break;\n    case State.Walk:\n        move();\n}\n"
    );

    let settings = DecompileSettings::from_skip_list(&["macro-resolution"]);
    let text = decompile_with(source, &game, &settings);
    assert!(text.starts_with("switch (state)\n{\n    case 0:\n"));
}

#[test]
fn enum_collection_can_be_disabled() {
    let registry = MacroRegistry::from_json(STATE_REGISTRY).unwrap();
    let game = SimpleGameContext::with_registry(registry);
    let code = assemble(CODE_ENTRY, "pushi.e 2\npop.v.i self.state\nexit.i\n").unwrap();
    let settings = DecompileSettings {
        create_enum_declarations: false,
        ..DecompileSettings::default()
    };
    let mut ctx = DecompileContext::new(&game, &code, &settings);
    assert_eq!(ctx.decompile_to_string().unwrap(), "state = State.Jump;\n");
    let values: Vec<String> = ctx
        .enum_declarations()
        .iter()
        .flat_map(|(_, values)| values.values().cloned())
        .collect();
    assert!(values.is_empty(), "declarations are not collected when disabled");
}

const GLOBAL_SCRIPT: &str = "b [decl]
> gml_Script_add (locals=0, args=2)
push.v arg.argument0
push.v arg.argument1
add.v.v
ret.v
exit.i
:[decl]
push.i [function]gml_Script_add
conv.i.v
pushi.e -1
conv.i.v
call.i method 2
dup.v 0
pushi.e -6
pop.v.v [stacktop]self.add
popz.v
exit.i
";

#[test]
fn function_declaration_uses_named_arguments() {
    let registry = MacroRegistry::from_json(r#"{ "NamedArguments": { "gml_Script_add": ["a", "b"] } }"#).unwrap();
    let game = SimpleGameContext::with_registry(registry);
    let code = assemble("gml_GlobalScript_math", GLOBAL_SCRIPT).unwrap();
    let text = DecompileContext::new(&game, &code, &DecompileSettings::default())
        .decompile_to_string()
        .unwrap();
    assert_eq!(text, "function add(a, b)\n{\n    return a + b;\n}\n");
}

#[test]
fn calls_to_global_functions_use_their_names() {
    let script = assemble("gml_GlobalScript_math", GLOBAL_SCRIPT).unwrap();
    let game = SimpleGameContext {
        global_functions: GlobalFunctions::prescan(&[script]).unwrap(),
        ..SimpleGameContext::default()
    };
    let text = decompile_with(
        "push.v self.y
push.v self.x
call.i gml_Script_add 2
pop.v.v self.z
exit.i
",
        &game,
        &DecompileSettings::default(),
    );
    assert_eq!(text, "z = add(x, y);\n");
}

#[test]
fn struct_and_array_literals() {
    let text = decompile(
        "pushi.e 3
conv.i.v
pushi.e 2
conv.i.v
pushi.e 1
conv.i.v
call.i @@NewGMLArray@@ 3
pop.v.v self.list
exit.i
",
    );
    assert_eq!(text, "list = [1, 2, 3];\n");
}
