//! Masked single-line input for secrets typed at a terminal.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};

const MASK_CHAR: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskedKey {
    Continue,
    Submit,
    Cancel,
}

/// Applies one key press to the secret being typed.
pub fn apply_key(secret: &mut String, key: &KeyEvent) -> MaskedKey {
    let control = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => MaskedKey::Submit,
        KeyCode::Esc => MaskedKey::Cancel,
        KeyCode::Char('c') if control => MaskedKey::Cancel,
        KeyCode::Char('u') if control => {
            secret.clear();
            MaskedKey::Continue
        }
        KeyCode::Backspace => {
            secret.pop();
            MaskedKey::Continue
        }
        KeyCode::Char('\n' | '\r') => MaskedKey::Submit,
        KeyCode::Char(c) if !control => {
            secret.push(c);
            MaskedKey::Continue
        }
        _ => MaskedKey::Continue,
    }
}

/// Reads a line from the terminal in raw mode, echoing one mask character
/// per typed character. Blocks the calling thread.
pub fn read_masked(label: &str) -> io::Result<Option<String>> {
    let mut stdout = io::stdout();
    print!("{label}");
    stdout.flush()?;

    enable_raw_mode()?;
    let result = read_masked_raw(&mut stdout);
    let restored = disable_raw_mode();
    println!();
    restored?;
    result
}

fn read_masked_raw(stdout: &mut io::Stdout) -> io::Result<Option<String>> {
    let mut secret = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let before = secret.chars().count();
        match apply_key(&mut secret, &key) {
            MaskedKey::Submit => return Ok(Some(secret)),
            MaskedKey::Cancel => return Ok(None),
            MaskedKey::Continue => {
                let after = secret.chars().count();
                if after > before {
                    write!(stdout, "{}", MASK_CHAR.to_string().repeat(after - before))?;
                } else if after < before {
                    write!(stdout, "{}", "\x08 \x08".repeat(before - after))?;
                }
                stdout.flush()?;
            }
        }
    }
}
