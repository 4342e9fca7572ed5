//! Turns a task and its argument values into a self-contained code snippet.
//!
//! The generated snippet imports the task's defining module, calls the
//! function with rendered arguments, and optionally binds the result to
//! names in the kernel's namespace. Pure text generation; nothing here
//! touches a kernel.

use crate::error::BuildError;
use crate::params::{is_identifier, is_module_path, ArgValue};
use crate::task::{ResponseCapture, TaskDescriptor};

/// Build the snippet for one invocation.
///
/// With a capture, the snippet ends with an expression naming the captured
/// value(s), so the kernel publishes the result on the broadcast stream as
/// well as binding it.
pub fn build(
    task: &TaskDescriptor,
    args: &[ArgValue],
    kwargs: &[(String, ArgValue)],
    capture: Option<&ResponseCapture>,
) -> Result<String, BuildError> {
    if !is_module_path(&task.module) {
        return Err(BuildError::InvalidModulePath(task.module.clone()));
    }
    if !is_identifier(&task.name) {
        return Err(BuildError::InvalidIdentifier(task.name.clone()));
    }

    let mut rendered: Vec<String> = args.iter().map(ArgValue::render).collect();
    for (name, value) in kwargs {
        if !is_identifier(name) {
            return Err(BuildError::InvalidIdentifier(name.clone()));
        }
        rendered.push(format!("{}={}", name, value.render()));
    }
    let call = format!("{}({})", task.name, rendered.join(", "));

    let mut snippet = format!("from {} import {}\n\n", task.module, task.name);
    match capture {
        None => {
            snippet.push_str(&call);
            snippet.push('\n');
        }
        Some(ResponseCapture::Single(name)) => {
            if !is_identifier(name) {
                return Err(BuildError::InvalidIdentifier(name.clone()));
            }
            snippet.push_str(&format!("{name} = {call}\n{name}\n"));
        }
        Some(ResponseCapture::Unpack(names)) => {
            if names.is_empty() {
                return Err(BuildError::EmptyCapture);
            }
            for name in names {
                if !is_identifier(name) {
                    return Err(BuildError::InvalidIdentifier(name.clone()));
                }
            }
            let joined = names.join(", ");
            snippet.push_str(&format!("{joined} = {call}\n({joined})\n"));
        }
    }

    Ok(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDescriptor;

    fn task() -> TaskDescriptor {
        TaskDescriptor::new("observations.pointing", "slew_to")
    }

    #[test]
    fn test_plain_call_without_capture() {
        let snippet = build(&task(), &[], &[], None).unwrap();
        assert_eq!(
            snippet,
            "from observations.pointing import slew_to\n\nslew_to()\n"
        );
    }

    #[test]
    fn test_literal_arguments_in_declaration_order() {
        let args = [ArgValue::Int(42), ArgValue::Str("M31".into())];
        let kwargs = [
            ("fast".to_string(), ArgValue::Bool(true)),
            ("epoch".to_string(), ArgValue::Float(2000.0)),
        ];
        let snippet = build(&task(), &args, &kwargs, None).unwrap();
        assert_eq!(
            snippet,
            "from observations.pointing import slew_to\n\n\
             slew_to(42, 'M31', fast=True, epoch=2000.0)\n"
        );
    }

    #[test]
    fn test_variable_reference_stays_bare() {
        let kwargs = [("model".to_string(), ArgValue::var("model").unwrap())];
        let snippet = build(&task(), &[], &kwargs, None).unwrap();
        assert!(snippet.contains("model=model"));
        assert!(!snippet.contains("'model'"));
    }

    #[test]
    fn test_single_capture_binds_and_echoes() {
        let capture = ResponseCapture::Single("response".into());
        let snippet = build(&task(), &[], &[], Some(&capture)).unwrap();
        assert_eq!(
            snippet,
            "from observations.pointing import slew_to\n\n\
             response = slew_to()\nresponse\n"
        );
    }

    #[test]
    fn test_tuple_capture_unpacks_positionally() {
        let capture = ResponseCapture::Unpack(vec!["ra".into(), "dec".into()]);
        let snippet = build(&task(), &[ArgValue::Str("M31".into())], &[], Some(&capture)).unwrap();
        assert_eq!(
            snippet,
            "from observations.pointing import slew_to\n\n\
             ra, dec = slew_to('M31')\n(ra, dec)\n"
        );
    }

    #[test]
    fn test_invalid_keyword_name_fails() {
        let kwargs = [("not valid".to_string(), ArgValue::Int(1))];
        assert!(matches!(
            build(&task(), &[], &kwargs, None),
            Err(BuildError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_invalid_capture_name_fails() {
        let capture = ResponseCapture::Unpack(vec!["ra".into(), "2dec".into()]);
        assert!(matches!(
            build(&task(), &[], &[], Some(&capture)),
            Err(BuildError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_empty_capture_fails() {
        let capture = ResponseCapture::Unpack(vec![]);
        assert!(matches!(
            build(&task(), &[], &[], Some(&capture)),
            Err(BuildError::EmptyCapture)
        ));
    }

    #[test]
    fn test_bad_module_path_fails() {
        let bad = TaskDescriptor::new("import os;", "f");
        assert!(matches!(
            build(&bad, &[], &[], None),
            Err(BuildError::InvalidModulePath(_))
        ));
    }
}
