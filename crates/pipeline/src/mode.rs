//! chmod mode specifications: numeric octal (`750`) or symbolic clauses
//! (`u+rwx,go-w`, `a=rx`, `+x`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModeParseError {
  #[error("Invalid mode specification '{0}'")]
  Invalid(String),
}

const WHO_USER: u32 = 0o4700;
const WHO_GROUP: u32 = 0o2070;
const WHO_OTHER: u32 = 0o1007;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
  Add,
  Remove,
  Assign,
}

#[derive(Debug, Clone, Copy)]
enum Clause {
  Absolute(u32),
  Symbolic { who: u32, op: Op, perms: u32, cond_exec: bool },
}

/// A parsed mode specification, applied clause by clause to an existing
/// mode value.
#[derive(Debug, Clone)]
pub struct ModeSpec {
  clauses: Vec<Clause>,
}

impl ModeSpec {
  pub fn parse(spec: &str) -> Result<Self, ModeParseError> {
    let spec = spec.trim();
    if spec.is_empty() {
      return Err(ModeParseError::Invalid(spec.to_string()));
    }

    if spec.chars().all(|c| c.is_ascii_digit()) {
      let value = u32::from_str_radix(spec, 8).map_err(|_| ModeParseError::Invalid(spec.to_string()))?;
      if value > 0o7777 {
        return Err(ModeParseError::Invalid(spec.to_string()));
      }
      return Ok(Self {
        clauses: vec![Clause::Absolute(value)],
      });
    }

    let clauses = spec
      .split(',')
      .map(Self::parse_symbolic)
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { clauses })
  }

  fn parse_symbolic(clause: &str) -> Result<Clause, ModeParseError> {
    let invalid = || ModeParseError::Invalid(clause.to_string());

    let op_at = clause.find(['+', '-', '=']).ok_or_else(invalid)?;
    let (who_part, rest) = clause.split_at(op_at);
    let mut chars = rest.chars();
    let op = match chars.next() {
      Some('+') => Op::Add,
      Some('-') => Op::Remove,
      Some('=') => Op::Assign,
      _ => return Err(invalid()),
    };

    let mut who = 0u32;
    for c in who_part.chars() {
      who |= match c {
        'u' => WHO_USER,
        'g' => WHO_GROUP,
        'o' => WHO_OTHER,
        'a' => WHO_USER | WHO_GROUP | WHO_OTHER,
        _ => return Err(invalid()),
      };
    }
    if who == 0 {
      who = WHO_USER | WHO_GROUP | WHO_OTHER;
    }

    let mut perms = 0u32;
    let mut cond_exec = false;
    for c in chars {
      perms |= match c {
        'r' => 0o444,
        'w' => 0o222,
        'x' => 0o111,
        'X' => {
          cond_exec = true;
          0
        }
        's' => 0o6000,
        't' => 0o1000,
        _ => return Err(invalid()),
      };
    }

    Ok(Clause::Symbolic { who, op, perms, cond_exec })
  }

  /// Apply the spec to `mode` (the permission bits of an existing file).
  /// `is_dir` controls how a conditional `X` resolves.
  pub fn apply(&self, mode: u32, is_dir: bool) -> u32 {
    let mut mode = mode & 0o7777;
    for clause in &self.clauses {
      mode = match *clause {
        Clause::Absolute(value) => value,
        Clause::Symbolic { who, op, perms, cond_exec } => {
          let mut bits = perms;
          if cond_exec && (is_dir || mode & 0o111 != 0) {
            bits |= 0o111;
          }
          let bits = bits & who;
          match op {
            Op::Add => mode | bits,
            Op::Remove => mode & !bits,
            Op::Assign => (mode & !(who & 0o7777)) | bits,
          }
        }
      };
    }
    mode
  }
}
