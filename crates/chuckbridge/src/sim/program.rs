//! Parsing of the statement subset understood by the simulated engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::engine::GlobalKind;

/// What a global name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Declared {
    Scalar(GlobalKind),
    Event,
}

impl fmt::Display for Declared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declared::Scalar(kind) => kind.fmt(f),
            Declared::Event => f.write_str("Event"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UgenKind {
    SinOsc,
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UgenParam {
    Freq,
    Gain,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TimeUnit {
    Samp,
    Ms,
    Second,
}

/// Something `<<< >>>` prints.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Literal(Literal),
    Global(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    Declare { name: String, declared: Declared },
    Connect { kind: UgenKind, name: String },
    Passthrough,
    SetParam { name: String, param: UgenParam, value: f64 },
    Assign { value: Literal, name: String },
    CaptureTime { name: String },
    Wait { amount: f64, unit: TimeUnit },
    WaitEvent { name: String },
    Signal { name: String },
    Broadcast { name: String },
    Print(Operand),
}

/// A parsed, checked program.
#[derive(Debug, Clone, Default)]
pub(crate) struct Program {
    pub statements: Vec<Statement>,
    /// Globals this program declares, in declaration order.
    pub declarations: Vec<(String, Declared)>,
}

#[derive(Debug, Clone, Copy)]
enum Form {
    Declare,
    Connect,
    Passthrough,
    SetParam,
    Wait,
    CaptureTime,
    WaitEvent,
    Assign,
    Trigger,
    Print,
}

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_]*";
const NUMBER: &str = r"-?\d+(?:\.\d+)?";

static FORMS: LazyLock<Vec<(Form, Regex)>> = LazyLock::new(|| {
    [
        (Form::Declare, format!(r"^global\s+(int|float|string|Event)\s+({IDENT})$")),
        (Form::Connect, format!(r"^(SinOsc|Noise)\s+({IDENT})\s*=>\s*dac$")),
        (Form::Passthrough, r"^adc\s*=>\s*dac$".to_string()),
        (Form::SetParam, format!(r"^({NUMBER})\s*=>\s*({IDENT})\.(freq|gain)$")),
        (Form::Wait, format!(r"^({NUMBER})\s*::\s*(samp|ms|second)\s*=>\s*now$")),
        (Form::CaptureTime, format!(r"^now\s*/\s*samp\s*=>\s*({IDENT})$")),
        (Form::WaitEvent, format!(r"^({IDENT})\s*=>\s*now$")),
        (Form::Assign, format!(r#"^({NUMBER}|"[^"]*")\s*=>\s*({IDENT})$"#)),
        (Form::Trigger, format!(r"^({IDENT})\.(signal|broadcast)\(\s*\)$")),
        (Form::Print, r"^<<<\s*(.+?)\s*>>>$".to_string()),
    ]
    .into_iter()
    .filter_map(|(form, pattern)| Regex::new(&pattern).ok().map(|re| (form, re)))
    .collect()
});

static IDENT_ONLY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(&format!("^{IDENT}$")).ok());

/// A compile diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line({}): {}", self.line, self.message)
    }
}

/// Parse `source`, resolving names against this program's own declarations
/// and then `existing` (globals declared by earlier compiles).
pub(crate) fn parse(
    source: &str,
    existing: &dyn Fn(&str) -> Option<Declared>,
) -> Result<Program, ParseError> {
    let mut program = Program::default();
    let mut declared: HashMap<String, Declared> = HashMap::new();
    let mut ugens: HashMap<String, UgenKind> = HashMap::new();

    for (line, text) in statements(source) {
        let err = |message: String| ParseError { line, message };
        let lookup = |name: &str| declared.get(name).copied().or_else(|| existing(name));

        let statement =
            match_form(&text).ok_or_else(|| err(format!("syntax error near '{text}'")))?;
        match &statement {
            Statement::Declare { name, declared: kind } => {
                if ugens.contains_key(name) {
                    return Err(err(format!("'{name}' is already a unit generator")));
                }
                if let Some(previous) = lookup(name) {
                    if previous != *kind {
                        return Err(err(format!(
                            "global '{name}' already declared as {previous}, not {kind}"
                        )));
                    }
                }
                if declared.insert(name.clone(), *kind).is_none() {
                    program.declarations.push((name.clone(), *kind));
                }
            }
            Statement::Connect { kind, name } => {
                if lookup(name).is_some() || ugens.contains_key(name) {
                    return Err(err(format!("'{name}' is already declared")));
                }
                ugens.insert(name.clone(), *kind);
            }
            Statement::SetParam { name, param, .. } => match ugens.get(name) {
                Some(UgenKind::Noise) if *param == UgenParam::Freq => {
                    return Err(err(format!("Noise '{name}' has no member 'freq'")));
                }
                Some(_) => {}
                None => return Err(err(format!("undefined unit generator '{name}'"))),
            },
            Statement::Assign { value, name } => {
                let kind = scalar(lookup(name), name).map_err(err)?;
                let fits = matches!(
                    (value, kind),
                    (Literal::Int(_), GlobalKind::Int | GlobalKind::Float)
                        | (Literal::Float(_), GlobalKind::Float)
                        | (Literal::Str(_), GlobalKind::Str)
                );
                if !fits {
                    return Err(err(format!(
                        "cannot assign {} to {kind} '{name}'",
                        literal_kind(value)
                    )));
                }
            }
            Statement::CaptureTime { name } => {
                if scalar(lookup(name), name).map_err(err)? == GlobalKind::Str {
                    return Err(err(format!("cannot assign time to string '{name}'")));
                }
            }
            Statement::WaitEvent { name }
            | Statement::Signal { name }
            | Statement::Broadcast { name } => {
                if lookup(name) != Some(Declared::Event) {
                    return Err(err(format!("'{name}' is not a global Event")));
                }
            }
            Statement::Print(Operand::Global(name)) => {
                scalar(lookup(name), name).map_err(err)?;
            }
            Statement::Passthrough | Statement::Wait { .. } | Statement::Print(_) => {}
        }
        program.statements.push(statement);
    }
    Ok(program)
}

/// Split into `;`-terminated statements with `//` comments removed, keeping
/// the line each statement starts on.
fn statements(source: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 1;
    for (index, raw) in source.lines().enumerate() {
        let line = raw.split("//").next().unwrap_or_default();
        for (i, piece) in line.split(';').enumerate() {
            if i > 0 {
                let text = current.trim().to_string();
                if !text.is_empty() {
                    out.push((start, text));
                }
                current.clear();
            }
            if current.trim().is_empty() {
                start = index + 1;
            }
            current.push_str(piece);
            current.push(' ');
        }
    }
    let text = current.trim().to_string();
    if !text.is_empty() {
        out.push((start, text));
    }
    out
}

fn match_form(text: &str) -> Option<Statement> {
    let (form, caps) = FORMS
        .iter()
        .find_map(|(form, re)| re.captures(text).map(|caps| (*form, caps)))?;
    let cap = |i: usize| caps.get(i).map_or("", |m| m.as_str());
    let number = |i: usize| cap(i).parse::<f64>().ok();

    let statement = match form {
        Form::Declare => Statement::Declare {
            name: cap(2).to_string(),
            declared: match cap(1) {
                "int" => Declared::Scalar(GlobalKind::Int),
                "float" => Declared::Scalar(GlobalKind::Float),
                "string" => Declared::Scalar(GlobalKind::Str),
                _ => Declared::Event,
            },
        },
        Form::Connect => Statement::Connect {
            kind: if cap(1) == "SinOsc" { UgenKind::SinOsc } else { UgenKind::Noise },
            name: cap(2).to_string(),
        },
        Form::Passthrough => Statement::Passthrough,
        Form::SetParam => Statement::SetParam {
            name: cap(2).to_string(),
            param: if cap(3) == "freq" { UgenParam::Freq } else { UgenParam::Gain },
            value: number(1)?,
        },
        Form::Wait => Statement::Wait {
            amount: number(1)?,
            unit: match cap(2) {
                "samp" => TimeUnit::Samp,
                "ms" => TimeUnit::Ms,
                _ => TimeUnit::Second,
            },
        },
        Form::CaptureTime => Statement::CaptureTime {
            name: cap(1).to_string(),
        },
        Form::WaitEvent => Statement::WaitEvent {
            name: cap(1).to_string(),
        },
        Form::Assign => Statement::Assign {
            value: literal(cap(1))?,
            name: cap(2).to_string(),
        },
        Form::Trigger => {
            let name = cap(1).to_string();
            if cap(2) == "signal" {
                Statement::Signal { name }
            } else {
                Statement::Broadcast { name }
            }
        }
        Form::Print => Statement::Print(operand(cap(1))?),
    };
    Some(statement)
}

fn literal(text: &str) -> Option<Literal> {
    if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Some(Literal::Str(inner.to_string()));
    }
    if !text.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Literal::Int(n));
    }
    text.parse::<f64>().ok().map(Literal::Float)
}

fn operand(text: &str) -> Option<Operand> {
    if let Some(value) = literal(text) {
        return Some(Operand::Literal(value));
    }
    let is_ident = IDENT_ONLY.as_ref().is_some_and(|re| re.is_match(text));
    is_ident.then(|| Operand::Global(text.to_string()))
}

fn scalar(declared: Option<Declared>, name: &str) -> Result<GlobalKind, String> {
    match declared {
        Some(Declared::Scalar(kind)) => Ok(kind),
        Some(Declared::Event) => Err(format!("'{name}' is an Event, not a scalar")),
        None => Err(format!("undefined global '{name}'")),
    }
}

fn literal_kind(value: &Literal) -> GlobalKind {
    match value {
        Literal::Int(_) => GlobalKind::Int,
        Literal::Float(_) => GlobalKind::Float,
        Literal::Str(_) => GlobalKind::Str,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none(_: &str) -> Option<Declared> {
        None
    }

    #[test]
    fn test_oscillator_program() {
        let program = parse("SinOsc s => dac; 440 => s.freq; 1::second => now;", &none).unwrap();
        assert_eq!(
            program.statements,
            vec![
                Statement::Connect { kind: UgenKind::SinOsc, name: "s".into() },
                Statement::SetParam { name: "s".into(), param: UgenParam::Freq, value: 440.0 },
                Statement::Wait { amount: 1.0, unit: TimeUnit::Second },
            ]
        );
    }

    #[test]
    fn test_invalid_code_rejected() {
        let err = parse("not valid code", &none).unwrap_err();
        assert!(err.message.contains("syntax error"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_declarations_recorded() {
        let program = parse("global int x;\nglobal Event e;\n42 => x;\ne => now;", &none).unwrap();
        assert_eq!(
            program.declarations,
            vec![
                ("x".to_string(), Declared::Scalar(GlobalKind::Int)),
                ("e".to_string(), Declared::Event),
            ]
        );
        assert_eq!(program.statements.len(), 4);
    }

    #[test]
    fn test_names_resolve_against_existing_globals() {
        let existing = |name: &str| (name == "go").then_some(Declared::Event);
        assert!(parse("go.signal();", &existing).is_ok());
        assert!(parse("stop.signal();", &existing).is_err());
        assert!(parse("global int go;", &existing).is_err());
    }

    #[test]
    fn test_assignment_kinds_checked() {
        assert!(parse("global float f; 1 => f; 0.5 => f;", &none).is_ok());
        assert!(parse("global int n; 0.5 => n;", &none).is_err());
        assert!(parse("global string s; \"hi\" => s;", &none).is_ok());
        assert!(parse("global string s; now/samp => s;", &none).is_err());
    }

    #[test]
    fn test_comments_and_line_numbers() {
        let source = "// header\nglobal int t;\nnow/samp => t; // stamp\n\nbogus;";
        let err = parse(source, &none).unwrap_err();
        assert_eq!(err.line, 5);
        let ok = parse("global int t; // x\nnow/samp => t;", &none).unwrap();
        assert_eq!(ok.statements[1], Statement::CaptureTime { name: "t".into() });
    }

    #[test]
    fn test_print_operands() {
        let source = "global int x; <<< x >>>; <<< \"hi\" >>>; <<< 2.5 >>>;";
        let program = parse(source, &none).unwrap();
        assert_eq!(program.statements[1], Statement::Print(Operand::Global("x".into())));
        assert_eq!(
            program.statements[2],
            Statement::Print(Operand::Literal(Literal::Str("hi".into())))
        );
        assert!(parse("<<< y >>>;", &none).is_err());
    }

    #[test]
    fn test_noise_has_no_frequency() {
        assert!(parse("Noise n => dac; 0.1 => n.gain;", &none).is_ok());
        assert!(parse("Noise n => dac; 440 => n.freq;", &none).is_err());
    }
}
