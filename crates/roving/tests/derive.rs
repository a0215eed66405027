//! Tests for `#[remote_methods]`.

#![cfg(feature = "derive")]

use std::marker::PhantomData;
use std::sync::Mutex;

use roving::{remote_methods, InvokeError, Remotable};

struct Greeter {
    greeting: String,
}

#[remote_methods]
impl Greeter {
    pub fn hello(&self, args: &[u8]) -> Result<Vec<u8>, InvokeError> {
        Ok(self.render(args).into_bytes())
    }

    pub fn shout(&self, args: &[u8]) -> Result<Vec<u8>, InvokeError> {
        Ok(self.render(args).to_uppercase().into_bytes())
    }

    fn render(&self, name: &[u8]) -> String {
        format!("{} {}", self.greeting, String::from_utf8_lossy(name))
    }
}

#[test]
fn test_public_methods_become_selectors() {
    let greeter = Greeter {
        greeting: "hello".into(),
    };
    assert_eq!(greeter.invoke("hello", b"ada").unwrap(), b"hello ada");
    assert_eq!(greeter.invoke("shout", b"ada").unwrap(), b"HELLO ADA");
}

#[test]
fn test_private_methods_are_not_exposed() {
    let greeter = Greeter {
        greeting: "hi".into(),
    };
    assert!(matches!(
        greeter.invoke("render", b""),
        Err(InvokeError::UnknownSelector(ref name)) if name == "render"
    ));
}

#[test]
fn test_as_any_recovers_the_concrete_type() {
    let greeter = Greeter {
        greeting: "hey".into(),
    };
    let object: &dyn Remotable = &greeter;
    let recovered = object.as_any().downcast_ref::<Greeter>().unwrap();
    assert_eq!(recovered.greeting, "hey");
}

#[derive(Debug)]
struct Empty;

impl From<Empty> for InvokeError {
    fn from(_: Empty) -> Self {
        Self::Failed("stack is empty".into())
    }
}

struct Stack {
    items: Mutex<Vec<u8>>,
}

#[remote_methods]
impl Stack {
    pub fn push(&self, args: &[u8]) -> Result<Vec<u8>, Empty> {
        self.items.lock().unwrap().extend_from_slice(args);
        Ok(Vec::new())
    }

    pub fn pop(&self, _args: &[u8]) -> Result<Vec<u8>, Empty> {
        self.items.lock().unwrap().pop().map(|b| vec![b]).ok_or(Empty)
    }
}

#[test]
fn test_method_errors_convert_into_invoke_error() {
    let stack = Stack {
        items: Mutex::new(Vec::new()),
    };
    stack.invoke("push", &[1, 2]).unwrap();
    assert_eq!(stack.invoke("pop", &[]).unwrap(), vec![2]);
    assert_eq!(stack.invoke("pop", &[]).unwrap(), vec![1]);
    assert!(matches!(
        stack.invoke("pop", &[]),
        Err(InvokeError::Failed(ref message)) if message == "stack is empty"
    ));
}

struct Tagged<T> {
    tag: &'static str,
    _marker: PhantomData<fn() -> T>,
}

#[remote_methods(crate = ::roving)]
impl<T: 'static> Tagged<T> {
    pub fn tag(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
        Ok(self.tag.as_bytes().to_vec())
    }
}

#[test]
fn test_generic_types_and_crate_override() {
    let tagged = Tagged::<u32> {
        tag: "blue",
        _marker: PhantomData,
    };
    assert_eq!(tagged.invoke("tag", b"").unwrap(), b"blue");
    assert!(tagged.invoke("color", b"").is_err());
}
