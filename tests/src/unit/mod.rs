mod chat_session_tests;
mod credential_tests;
mod requester_tests;
