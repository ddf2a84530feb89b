//! Export filename templates.
//!
//! Templates may reference `{artifact}`, `{os}`, `{arch}` and `{libc}`. The
//! rendered name must be a single path component since the export directory
//! is flat.

use thiserror::Error;

use super::types::TargetEnvironment;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
  #[error("unknown placeholder '{{{name}}}' in filename template '{template}'")]
  UnknownPlaceholder { template: String, name: String },

  #[error("unclosed '{{' in filename template '{template}'")]
  Unclosed { template: String },

  #[error("filename template '{template}' renders to invalid filename '{rendered}'")]
  InvalidFilename { template: String, rendered: String },
}

/// Render an export filename for `target`.
pub fn render_filename(template: &str, artifact: &str, target: &TargetEnvironment) -> Result<String, TemplateError> {
  let mut rendered = String::with_capacity(template.len() + artifact.len());
  let mut rest = template;

  while let Some(start) = rest.find('{') {
    rendered.push_str(&rest[..start]);
    let after = &rest[start + 1..];
    let end = after.find('}').ok_or_else(|| TemplateError::Unclosed {
      template: template.to_string(),
    })?;
    let name = &after[..end];
    let value = match name {
      "artifact" => artifact,
      "os" => target.os().as_str(),
      "arch" => target.arch.as_str(),
      "libc" => target.family.libc().unwrap_or(""),
      _ => {
        return Err(TemplateError::UnknownPlaceholder {
          template: template.to_string(),
          name: name.to_string(),
        });
      }
    };
    rendered.push_str(value);
    rest = &after[end + 1..];
  }
  rendered.push_str(rest);

  if rendered.is_empty()
    || rendered == "."
    || rendered == ".."
    || rendered.contains(['/', '\\', '\0'])
  {
    return Err(TemplateError::InvalidFilename {
      template: template.to_string(),
      rendered,
    });
  }

  Ok(rendered)
}
