use pipekvs::parser::{parse_command, Command, Commands};
use std::io::Cursor;

fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
    list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

#[test]
fn parses_write_with_several_pairs() {
    assert_eq!(
        parse_command("WRITE [(a,1)(b,2)]"),
        Command::Write(pairs(&[("a", "1"), ("b", "2")]))
    );
}

#[test]
fn parses_read_and_delete_lists() {
    assert_eq!(parse_command("READ [a,b,c]"), Command::Read(keys(&["a", "b", "c"])));
    assert_eq!(parse_command("DELETE [a]"), Command::Delete(keys(&["a"])));
    assert_eq!(parse_command("READ [a, b]"), Command::Read(keys(&["a", "b"])));
}

#[test]
fn parses_commands_without_arguments() {
    assert_eq!(parse_command("SHOW"), Command::Show);
    assert_eq!(parse_command("BACKUP\n"), Command::Backup);
    assert_eq!(parse_command("  HELP  "), Command::Help);
    assert_eq!(parse_command("WAIT 250"), Command::Wait(250));
}

#[test]
fn blank_lines_and_comments_are_empty() {
    assert_eq!(parse_command(""), Command::Empty);
    assert_eq!(parse_command("   \n"), Command::Empty);
    assert_eq!(parse_command("# READ [a]"), Command::Empty);
}

#[test]
fn malformed_commands_are_invalid() {
    for line in &[
        "WRITE [(a,1)",
        "WRITE []",
        "WRITE [(a)]",
        "READ []",
        "READ a",
        "WAIT",
        "WAIT soon",
        "SHOW everything",
        "FETCH [a]",
        "READ[a]",
    ] {
        assert!(
            matches!(parse_command(line), Command::Invalid(_)),
            "expected '{}' to be invalid",
            line
        );
    }
}

#[test]
fn keys_longer_than_the_limit_are_invalid() {
    let long_key = "k".repeat(41);
    assert!(matches!(
        parse_command(&format!("READ [{}]", long_key)),
        Command::Invalid(_)
    ));
    let max_key = "k".repeat(40);
    assert_eq!(
        parse_command(&format!("READ [{}]", max_key)),
        Command::Read(vec![max_key])
    );
}

#[test]
fn too_many_pairs_are_invalid() {
    let list: Vec<String> = (0..257).map(|i| format!("k{}", i)).collect();
    let line = format!("DELETE [{}]", list.join(","));
    assert!(matches!(parse_command(&line), Command::Invalid(_)));
}

#[test]
fn commands_iterator_stops_at_end_of_input() {
    let job = "WRITE [(a,1)]\n\n# comment\nREAD [a]\nBOGUS\nSHOW";
    let commands: Vec<Command> = Commands::new(Cursor::new(job)).collect();
    assert_eq!(
        commands,
        vec![
            Command::Write(pairs(&[("a", "1")])),
            Command::Empty,
            Command::Empty,
            Command::Read(keys(&["a"])),
            Command::Invalid("BOGUS".to_string()),
            Command::Show,
        ]
    );
}

#[test]
fn commands_iterator_continues_after_a_line_that_is_not_utf8() {
    let job: &[u8] = b"WRITE [(a,1)]\n\xff\xfe\nREAD [a]\n";
    let commands: Vec<Command> = Commands::new(Cursor::new(job)).collect();
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[0], Command::Write(pairs(&[("a", "1")])));
    assert!(matches!(commands[1], Command::Invalid(_)));
    assert_eq!(commands[2], Command::Read(keys(&["a"])));
}
