//! Choosing a constructor or method signature for a set of argument values.

use crate::backend::Signature;
use crate::convert::{is_assignable, Converter};
use crate::error::{DiError, DiResult};
use crate::types::TypeSpec;
use crate::value::Value;

/// An evaluated argument.
#[derive(Debug, Clone)]
pub(crate) struct ArgValue {
    pub(crate) index: Option<usize>,
    pub(crate) ty: Option<TypeSpec>,
    pub(crate) value: Value,
}

/// Picks the one signature matching `args` and returns it with the
/// converted argument values in parameter order.
///
/// Candidates must have the right arity. Arguments with explicit indices
/// are placed by index. Otherwise an exact pass (no conversion needed) runs
/// first, then a pass converting in declaration order, then a pass that may
/// reorder arguments. More than one match in a pass is an ambiguity error.
pub(crate) fn select(
    signatures: &[Signature],
    args: &[ArgValue],
    converter: &Converter,
    what: &str,
) -> DiResult<(usize, Vec<Value>)> {
    let indexed = args.iter().filter(|a| a.index.is_some()).count();
    if indexed != 0 && indexed != args.len() {
        return Err(DiError::definition(format!(
            "either all or none of the arguments of {what} must carry an index"
        )));
    }
    let ordered: Vec<&ArgValue> = if indexed > 0 {
        let mut ordered = args.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|a| a.index);
        for (position, arg) in ordered.iter().enumerate() {
            if arg.index != Some(position) {
                return Err(DiError::definition(format!(
                    "argument indices of {what} must be unique and contiguous from 0"
                )));
            }
        }
        ordered
    } else {
        args.iter().collect()
    };

    let candidates: Vec<(usize, &Signature)> = signatures
        .iter()
        .enumerate()
        .filter(|(_, sig)| sig.arity() == ordered.len())
        .collect();

    let exact: Vec<(usize, Vec<Value>)> = candidates
        .iter()
        .filter(|(_, sig)| {
            ordered
                .iter()
                .zip(&sig.params)
                .all(|(arg, param)| exact_match(arg, param))
        })
        .map(|(i, _)| (*i, ordered.iter().map(|a| a.value.clone()).collect()))
        .collect();
    if let Some(found) = unique(exact, args, what)? {
        return Ok(found);
    }

    let loose: Vec<(usize, Vec<Value>)> = candidates
        .iter()
        .filter_map(|(i, sig)| convert_in_order(&ordered, sig, converter).map(|v| (*i, v)))
        .collect();
    if let Some(found) = unique(loose, args, what)? {
        return Ok(found);
    }

    if indexed == 0 {
        let reordered: Vec<(usize, Vec<Value>)> = candidates
            .iter()
            .filter_map(|(i, sig)| convert_reordered(&ordered, sig, converter).map(|v| (*i, v)))
            .collect();
        if let Some(found) = unique(reordered, args, what)? {
            return Ok(found);
        }
    }

    Err(DiError::definition(format!(
        "unable to find a matching {what} for arguments {}",
        describe(args)
    )))
}

fn exact_match(arg: &ArgValue, param: &TypeSpec) -> bool {
    match &arg.ty {
        Some(declared) => declared == param,
        None => !param.is_container() && is_assignable(&arg.value, param),
    }
}

fn convert_in_order(ordered: &[&ArgValue], sig: &Signature, converter: &Converter) -> Option<Vec<Value>> {
    ordered
        .iter()
        .zip(&sig.params)
        .map(|(arg, param)| {
            if arg.ty.as_ref().is_some_and(|declared| declared != param) {
                return None;
            }
            converter.convert(&arg.value, param).ok()
        })
        .collect()
}

fn convert_reordered(ordered: &[&ArgValue], sig: &Signature, converter: &Converter) -> Option<Vec<Value>> {
    let mut used = vec![false; ordered.len()];
    let mut out = Vec::with_capacity(ordered.len());
    for param in &sig.params {
        let found = ordered.iter().enumerate().find_map(|(j, arg)| {
            if used[j] || arg.ty.as_ref().is_some_and(|declared| declared != param) {
                return None;
            }
            converter.convert(&arg.value, param).ok().map(|v| (j, v))
        })?;
        used[found.0] = true;
        out.push(found.1);
    }
    Some(out)
}

fn unique(
    mut found: Vec<(usize, Vec<Value>)>,
    args: &[ArgValue],
    what: &str,
) -> DiResult<Option<(usize, Vec<Value>)>> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(DiError::definition(format!(
            "multiple matching {what}s found for arguments {}",
            describe(args)
        ))),
    }
}

fn describe(args: &[ArgValue]) -> String {
    let kinds: Vec<&str> = args.iter().map(|a| a.value.kind()).collect();
    format!("[{}]", kinds.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(value: impl Into<Value>) -> ArgValue {
        ArgValue {
            index: None,
            ty: None,
            value: value.into(),
        }
    }

    #[test]
    fn exact_match_wins_over_conversion() {
        let sigs = vec![Signature::new([TypeSpec::I32]), Signature::new([TypeSpec::String])];
        let (index, values) = select(&sigs, &[arg("42")], &Converter::new(), "constructor").unwrap();
        assert_eq!(index, 1);
        assert_eq!(values, vec![Value::str("42")]);
    }

    #[test]
    fn converts_when_no_exact_match() {
        let sigs = vec![Signature::new([TypeSpec::I32, TypeSpec::Bool])];
        let (_, values) = select(&sigs, &[arg("7"), arg("yes")], &Converter::new(), "constructor").unwrap();
        assert_eq!(values, vec![Value::Int(7), Value::Bool(true)]);
    }

    #[test]
    fn reorders_unindexed_arguments() {
        let sigs = vec![Signature::new([TypeSpec::Duration, TypeSpec::Bool])];
        let (_, values) = select(&sigs, &[arg(true), arg("5s")], &Converter::new(), "constructor").unwrap();
        assert_eq!(values[1], Value::Bool(true));
    }

    #[test]
    fn ambiguity_is_reported() {
        let sigs = vec![Signature::new([TypeSpec::I64]), Signature::new([TypeSpec::F64])];
        let err = select(&sigs, &[arg("3")], &Converter::new(), "constructor").unwrap_err();
        assert!(err.to_string().contains("multiple matching"));
    }

    #[test]
    fn indices_must_cover_every_argument() {
        let sigs = vec![Signature::new([TypeSpec::String, TypeSpec::String])];
        let mut first = arg("a");
        first.index = Some(1);
        let err = select(&sigs, &[first, arg("b")], &Converter::new(), "constructor").unwrap_err();
        assert!(matches!(err, DiError::ComponentDefinition(_)));
    }

    #[test]
    fn no_match_is_a_definition_error() {
        let sigs = vec![Signature::new([TypeSpec::Bool])];
        assert!(select(&sigs, &[arg("a"), arg("b")], &Converter::new(), "constructor").is_err());
    }
}
