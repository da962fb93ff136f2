use dollar_shell::parse::{parse_template, Connector, Part, RedirectOp, RedirectTarget, WordNode};
use dollar_shell::{sh, ParseErrorKind, ShellValue, Template};

fn literal(word: &WordNode) -> String {
    word.parts
        .iter()
        .map(|part| match part {
            Part::Literal { text, .. } => text.clone(),
            other => panic!("expected literal, got {other:?}"),
        })
        .collect()
}

fn argv(source: &str, values: Vec<ShellValue>) -> Vec<Vec<String>> {
    let template = Template::format(source, values).unwrap();
    let parsed = parse_template(&template).unwrap();
    parsed
        .script
        .list
        .items
        .iter()
        .flat_map(|(pipeline, _)| pipeline.commands.iter())
        .map(|command| command.argv.iter().map(literal).collect())
        .collect()
}

#[test]
fn pipeline_black_box() {
    let parsed = parse_template(&Template::from("echo hi | cat")).unwrap();
    let (pipeline, connector) = &parsed.script.list.items[0];
    assert_eq!(*connector, Connector::Sequential);
    assert_eq!(pipeline.commands.len(), 2);
    assert_eq!(literal(&pipeline.commands[0].argv[1]), "hi");
    assert_eq!(literal(&pipeline.commands[1].argv[0]), "cat");
}

#[test]
fn list_black_box() {
    let parsed = parse_template(&Template::from("a && b || c ; d &")).unwrap();
    let connectors: Vec<_> = parsed.script.list.items.iter().map(|(_, c)| *c).collect();
    assert_eq!(
        connectors,
        vec![Connector::And, Connector::Or, Connector::Sequential, Connector::Background]
    );
}

#[test]
fn values_stay_single_words() {
    let hostile = "a b; rm -rf / $(reboot) `x` *";
    assert_eq!(
        argv("echo {}", vec![hostile.into()]),
        vec![vec!["echo".to_string(), hostile.to_string()]]
    );
}

#[test]
fn arrays_splice_into_words() {
    let files = vec!["x y".to_string(), "z".to_string()];
    assert_eq!(
        argv("ls pre{}post", vec![files.into()]),
        vec![vec!["ls".to_string(), "prex y".to_string(), "zpost".to_string()]]
    );
    let empty: Vec<String> = Vec::new();
    assert_eq!(argv("ls {}", vec![empty.into()]), vec![vec!["ls".to_string()]]);
}

#[test]
fn handles_become_redirect_targets() {
    let template = Template::format("cat < {}", vec![ShellValue::bytes(b"data".to_vec())]).unwrap();
    let parsed = parse_template(&template).unwrap();
    let command = &parsed.script.list.items[0].0.commands[0];
    assert_eq!(command.redirects[0].op, RedirectOp::In);
    assert_eq!(command.redirects[0].target, RedirectTarget::Handle(0));
    assert!(parsed.handles[0].is_some());
}

#[test]
fn embedded_handle_is_rejected() {
    let template = Template::format("cat x{}", vec![ShellValue::bytes(Vec::new())]).unwrap();
    let err = parse_template(&template).unwrap_err();
    assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnexpectedToken));
}

#[test]
fn syntax_errors_carry_kind_and_position() {
    let err = parse_template(&Template::from("echo \"open")).unwrap_err();
    assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnterminatedQuote));
    assert!(err.position.is_some());

    let err = parse_template(&Template::from("echo $(date")).unwrap_err();
    assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnterminatedExpansion));

    let err = parse_template(&Template::from("| cat")).unwrap_err();
    assert_eq!(err.parse_kind(), Some(ParseErrorKind::UnexpectedToken));

    let err = parse_template(&Template::from("   ")).unwrap_err();
    assert_eq!(err.parse_kind(), Some(ParseErrorKind::EmptyCommand));
}

#[test]
fn macro_builds_promise() {
    let promise = sh!("echo {} {}", "a", 3).unwrap();
    assert_eq!(promise.source(), "echo ${0} ${1}");
}
