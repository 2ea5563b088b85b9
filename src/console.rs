//! Operator console: line-oriented input and numbered selections.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::errors::{AppError, AppResult};

pub struct Console {
    lines: Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>,
}

impl Console {
    pub fn new(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        let reader: Box<dyn AsyncRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }

    /// Next raw line; `None` at end of input. Cancel safe.
    pub async fn next_line(&mut self) -> AppResult<Option<String>> {
        self.lines
            .next_line()
            .await
            .map_err(|e| AppError::Internal(e.into()))
    }

    /// Print `text` without a newline and read the answer, trimmed.
    pub async fn prompt(&mut self, text: &str) -> AppResult<String> {
        print!("{}", text);
        std::io::stdout().flush().ok();
        match self.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(AppError::InvalidUserInput("input closed".into())),
        }
    }

    pub async fn prompt_default(&mut self, text: &str, default: &str) -> AppResult<String> {
        let answer = self.prompt(&format!("{} [{}]: ", text, default)).await?;
        Ok(if answer.is_empty() {
            default.to_string()
        } else {
            answer
        })
    }

    pub async fn confirm(&mut self, text: &str, default: bool) -> AppResult<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        let answer = self.prompt(&format!("{} [{}]: ", text, hint)).await?;
        Ok(match answer.to_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }

    /// Show `items` as a 1-based list and return the chosen index.
    pub async fn choose(&mut self, title: &str, items: &[String]) -> AppResult<usize> {
        if items.is_empty() {
            return Err(AppError::InvalidUserInput(format!("nothing to choose: {}", title)));
        }
        println!("\n=== {} ===", title);
        for (i, item) in items.iter().enumerate() {
            println!("  {}. {}", i + 1, item);
        }
        let answer = self.prompt("Enter number: ").await?;
        select_index(&answer, items.len())
    }
}

/// Parse a 1-based menu selection into a 0-based index.
pub fn select_index(input: &str, len: usize) -> AppResult<usize> {
    let n: usize = input
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidUserInput(format!("'{}' is not a number", input.trim())))?;
    if n == 0 || n > len {
        return Err(AppError::InvalidUserInput(format!(
            "{} is out of range (1-{})",
            n, len
        )));
    }
    Ok(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_index_bounds() {
        assert_eq!(select_index("1", 3).unwrap(), 0);
        assert_eq!(select_index(" 3 ", 3).unwrap(), 2);
        assert!(matches!(select_index("0", 3), Err(AppError::InvalidUserInput(_))));
        assert!(matches!(select_index("4", 3), Err(AppError::InvalidUserInput(_))));
        assert!(matches!(select_index("two", 3), Err(AppError::InvalidUserInput(_))));
    }

    #[tokio::test]
    async fn test_prompt_reads_scripted_lines() {
        let mut console = Console::new(&b"  alice \n\ny\n2\n"[..]);
        assert_eq!(console.prompt("name: ").await.unwrap(), "alice");
        assert_eq!(console.prompt_default("year", "2024").await.unwrap(), "2024");
        assert!(console.confirm("ok?", false).await.unwrap());
        let picked = console
            .choose("pick", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(picked, 1);
        assert!(console.prompt("more: ").await.is_err());
    }
}
