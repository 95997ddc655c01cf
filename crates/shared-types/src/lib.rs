//! Types shared between the assistant service client, the action dispatcher
//! and the command-line front end.

pub mod action;
pub mod assistant;

pub use action::{
    error_result, is_valid_email, ActionName, ActionRequest, ActionSpec, Arguments, ACTIONS,
};
pub use assistant::{
    Annotation, FileAttachment, FileObject, FileRef, FunctionCall, ListResponse, MessageContent,
    MessageRole, RequiredAction, Run, RunError, RunStatus, SubmitToolOutputs, TextContent, Thread,
    ThreadMessage, ToolCall, ToolOutput,
};
