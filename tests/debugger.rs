mod common;

use common::{wait_for, Fire, MockClass, MockField, MockMethod, MockVm, Model, THREAD};
use javelin::config::Config;
use javelin::debugger::error::Error;
use javelin::debugger::eval::EvalValue;
use javelin::debugger::snapshot::VariableKind;
use javelin::debugger::{Debugger, DebuggerState};
use javelin::jdwp::types::{event_kind, Value, ACC_STATIC};
use serial_test::serial;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// `Test` class with a `main` stopped at line 10 and two instance fields.
fn model() -> Model {
    let main = MockMethod {
        id: 10,
        name: "main".to_string(),
        signature: "([Ljava/lang/String;)V".to_string(),
        lines: vec![(0, 9), (8, 10), (16, 12)],
        arg_count: 1,
        slots: vec![
            (0, "args".to_string(), "[Ljava/lang/String;".to_string(), 100, 0),
            (0, "i".to_string(), "I".to_string(), 100, 1),
        ],
    };
    let get_count = MockMethod {
        id: 11,
        name: "getCount".to_string(),
        signature: "()I".to_string(),
        lines: vec![(0, 20)],
        arg_count: 0,
        slots: vec![],
    };
    let test_class = MockClass {
        type_id: 1,
        signature: "LTest;".to_string(),
        methods: vec![main, get_count],
        fields: vec![
            MockField {
                id: 20,
                name: "count".to_string(),
                signature: "I".to_string(),
                mod_bits: 0,
            },
            MockField {
                id: 21,
                name: "name".to_string(),
                signature: "Ljava/lang/String;".to_string(),
                mod_bits: 0,
            },
            MockField {
                id: 22,
                name: "VERSION".to_string(),
                signature: "I".to_string(),
                mod_bits: ACC_STATIC,
            },
        ],
    };

    Model {
        classes: vec![test_class],
        frames: vec![(100, 1, 10, 8)],
        this_object: Some(500),
        objects: HashMap::from([(500, 1)]),
        object_fields: HashMap::from([
            ((500, 20), Value::Int(3)),
            ((500, 21), Value::String(700)),
        ]),
        frame_slots: HashMap::from([((100, 0), Value::Object(0)), ((100, 1), Value::Int(7))]),
        invoke_results: HashMap::from([((500, 11), Value::Int(3))]),
        strings: HashMap::from([(700, "probe".to_string())]),
    }
}

fn config(port: u16) -> Config {
    Config {
        port,
        // echoes the launch arguments and exits, the mock plays the vm
        java: "echo".to_string(),
        attach_retries: 20,
        attach_retry_delay_ms: 50,
        attach_initial_delay_ms: 0,
        max_console_lines: 100,
        ..Config::default()
    }
}

fn launch_args() -> String {
    serde_json::json!({ "-classpath": "build" }).to_string()
}

#[test]
#[serial]
fn breakpoint_hit_and_inspect() {
    let vm = MockVm::spawn(
        model(),
        vec![Fire::ClassPrepare { class: 0 }, Fire::Breakpoint, Fire::VmDeath],
    );
    let debugger = Debugger::new(config(vm.port));

    assert!(debugger.add_breakpoint("Test.java", 10));
    assert!(!debugger.breakpoints()[0].active);

    debugger.start("Test", &launch_args()).unwrap();
    assert!(wait_for(
        || debugger.state() == DebuggerState::Breaking,
        TIMEOUT
    ));

    let location = debugger.location().unwrap();
    assert_eq!(location.source_path, "Test.java");
    assert_eq!(location.line, 10);
    assert_eq!(location.method, "main");
    assert_eq!(debugger.stack().unwrap().len(), 1);
    assert!(debugger.breakpoints()[0].active);

    let variables = debugger.variables().unwrap();
    let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["args", "i", "count", "name"]);

    let i = &variables[1];
    assert_eq!(i.kind, VariableKind::Local);
    assert_eq!(i.type_name, "int");
    assert_eq!(i.value, "7");
    assert_eq!(i.key.to_string(), "LTest;.main([Ljava/lang/String;)V#i");

    let count = &variables[2];
    assert_eq!(count.kind, VariableKind::Member);
    assert_eq!(count.value, "3");
    assert_eq!(count.key.to_string(), "LTest;.count)I");
    assert_eq!(variables[3].value, "\"probe\"");

    assert_eq!(
        debugger.evaluate("this.count").unwrap(),
        EvalValue::Int(3)
    );
    assert_eq!(debugger.evaluate("getCount()").unwrap(), EvalValue::Int(3));
    assert_eq!(
        debugger.evaluate("this.name").unwrap(),
        EvalValue::Str("probe".to_string())
    );
    assert!(matches!(
        debugger.evaluate("nosuch"),
        Err(Error::Eval(_))
    ));

    let console = debugger.take_console();
    assert!(console.iter().any(|line| line.contains("-agentlib:jdwp")));

    debugger.resume().unwrap();
    assert!(wait_for(|| debugger.state() == DebuggerState::Idle, TIMEOUT));
    debugger.stop().unwrap();
}

#[test]
#[serial]
fn stepping_moves_the_stop_location() {
    let vm = MockVm::spawn(
        model(),
        vec![
            Fire::ClassPrepare { class: 0 },
            Fire::Breakpoint,
            Fire::Step {
                class: 1,
                method: 10,
                index: 16,
            },
            Fire::VmDeath,
        ],
    );
    let debugger = Debugger::new(config(vm.port));

    debugger.add_breakpoint("Test.java", 10);
    debugger.start("Test", &launch_args()).unwrap();
    assert!(wait_for(
        || debugger.state() == DebuggerState::Breaking,
        TIMEOUT
    ));
    assert_eq!(debugger.location().unwrap().line, 10);

    debugger.step_over().unwrap();
    assert!(wait_for(
        || debugger.location().is_some_and(|l| l.line == 12),
        TIMEOUT
    ));
    assert_eq!(debugger.state(), DebuggerState::Breaking);

    debugger.resume().unwrap();
    assert!(wait_for(|| debugger.state() == DebuggerState::Idle, TIMEOUT));
}

#[test]
#[serial]
fn breakpoints_resolve_against_loaded_classes() {
    let vm = MockVm::spawn(model(), vec![Fire::ClassPrepare { class: 0 }]);
    let debugger = Debugger::new(config(vm.port));

    debugger.start("Test", &launch_args()).unwrap();
    // the class prepares on the first auto-resume, then nothing else fires;
    // its thread resume confirms the prepare was fired and handled
    assert!(wait_for(
        || !vm.log.lock().unwrap().thread_resumes.is_empty(),
        TIMEOUT
    ));

    // class already loaded, resolution happens inside add
    assert!(debugger.add_breakpoint("Test.java", 10));
    assert!(wait_for(
        || debugger.breakpoints().first().is_some_and(|bp| bp.active),
        TIMEOUT
    ));

    // no executable location on that line, the registration is dropped
    assert!(debugger.add_breakpoint("Test.java", 99));
    assert_eq!(debugger.breakpoints().len(), 1);

    // disabling clears the live request and reports the toggle
    assert!(debugger.set_breakpoint_enabled("Test.java", 10, false));
    assert!(!debugger.breakpoints()[0].active);
    assert!(vm.live_requests(event_kind::BREAKPOINT).is_empty());
    assert!(debugger.set_breakpoint_enabled("Test.java", 10, true));
    assert!(debugger.breakpoints()[0].active);

    assert!(debugger.delete_breakpoint("Test.java", 10));
    assert!(!debugger.delete_breakpoint("Test.java", 10));

    debugger.stop().unwrap();
    assert!(wait_for(|| debugger.state() == DebuggerState::Idle, TIMEOUT));
}

#[test]
#[serial]
fn duplicate_add_keeps_one_live_request() {
    let vm = MockVm::spawn(model(), vec![Fire::ClassPrepare { class: 0 }]);
    let debugger = Debugger::new(config(vm.port));

    debugger.start("Test", &launch_args()).unwrap();
    // the class-prepare set was resumed, so the class is loaded by now
    assert!(wait_for(
        || !vm.log.lock().unwrap().thread_resumes.is_empty(),
        TIMEOUT
    ));

    assert!(debugger.add_breakpoint("Test.java", 10));
    let first = vm.live_requests(event_kind::BREAKPOINT);
    assert_eq!(first.len(), 1);

    // re-adding the same line replaces the request instead of stacking one
    assert!(debugger.add_breakpoint("Test.java", 10));
    let second = vm.live_requests(event_kind::BREAKPOINT);
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
    assert_eq!(debugger.breakpoints().len(), 1);
    assert!(debugger.breakpoints()[0].active);

    debugger.stop().unwrap();
}

#[test]
#[serial]
fn event_thread_sets_resume_only_their_thread() {
    let vm = MockVm::spawn(
        model(),
        vec![Fire::ClassPrepare { class: 0 }, Fire::Breakpoint, Fire::VmDeath],
    );
    let debugger = Debugger::new(config(vm.port));

    debugger.add_breakpoint("Test.java", 10);
    debugger.start("Test", &launch_args()).unwrap();
    assert!(wait_for(
        || debugger.state() == DebuggerState::Breaking,
        TIMEOUT
    ));

    // the vm start set suspended everything, the class prepare set only its
    // posting thread; neither may decrement the breakpoint suspension
    {
        let log = vm.log.lock().unwrap();
        assert_eq!(log.vm_resumes, 1);
        assert_eq!(log.thread_resumes, vec![THREAD]);
    }
    assert_eq!(debugger.state(), DebuggerState::Breaking);

    debugger.resume().unwrap();
    assert!(wait_for(|| debugger.state() == DebuggerState::Idle, TIMEOUT));
    assert_eq!(vm.log.lock().unwrap().vm_resumes, 2);
}

#[test]
#[serial]
fn symbol_under_cursor_maps_to_live_value() {
    let source = "public class Test {\n\
                  \n\
                      private int count;\n\
                  \n\
                      public static void main(String[] args) {\n\
                          int i = 7;\n\
                          System.out.println(i);\n\
                      }\n\
                  }\n";
    let dir = tempfile::tempdir().unwrap();
    let mut file = std::fs::File::create(dir.path().join("Test.java")).unwrap();
    file.write_all(source.as_bytes()).unwrap();

    let vm = MockVm::spawn(
        model(),
        vec![Fire::ClassPrepare { class: 0 }, Fire::Breakpoint, Fire::VmDeath],
    );
    let debugger = Debugger::new(config(vm.port));
    debugger.analyze(dir.path()).unwrap();

    debugger.add_breakpoint("Test.java", 10);
    debugger.start("Test", &launch_args()).unwrap();
    assert!(wait_for(
        || debugger.state() == DebuggerState::Breaking,
        TIMEOUT
    ));

    // cursor on the `i` inside println
    let line = source.lines().position(|l| l.contains("println(i)")).unwrap() + 1;
    let column = source.lines().nth(line - 1).unwrap().find("(i)").unwrap() + 1;

    let value = debugger.symbol_value("Test.java", line, column).unwrap();
    assert_eq!(value.name, "i");
    assert_eq!(value.value, "7");

    debugger.resume().unwrap();
    assert!(wait_for(|| debugger.state() == DebuggerState::Idle, TIMEOUT));
}

#[test]
fn operations_respect_the_state_machine() {
    let debugger = Debugger::new(Config::default());

    assert!(matches!(debugger.resume(), Err(Error::UnexpectedState(_))));
    assert!(matches!(
        debugger.step_over(),
        Err(Error::UnexpectedState(_))
    ));
    assert!(matches!(
        debugger.evaluate("this"),
        Err(Error::UnexpectedState(_))
    ));
    assert!(matches!(debugger.suspend(), Err(Error::Unsupported(_))));

    assert!(debugger.location().is_none());
    assert!(debugger.stack().is_none());
    assert!(debugger.variables().is_none());

    assert!(!debugger.delete_breakpoint("Test.java", 1));
    assert!(debugger.add_breakpoint("Test.java", 1));
    assert_eq!(debugger.breakpoints().len(), 1);
    // nothing live to clear without a session
    assert!(!debugger.set_breakpoint_enabled("Test.java", 1, false));
    debugger.delete_all_breakpoints();
    assert!(debugger.breakpoints().is_empty());

    // stop without a session is a no-op
    debugger.stop().unwrap();
}
